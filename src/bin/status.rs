//! Show the state of every configured scanner.

use anyhow::Result;
use brkscan::db::queries::{self, LoadCounts};
use brkscan::db::{migrate, Db};
use brkscan::{Config, ProcessingStatus};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "status")]
#[command(about = "Show scanner status, last run and staging counts")]
struct Args {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Print the cumulative run log of one scanner
    #[arg(long, value_name = "ID")]
    log: Option<i64>,

    /// Directory containing the SQL migrations
    #[arg(long, default_value = "migrations")]
    migrations: PathBuf,
}

#[derive(Debug, Serialize)]
struct StatusRow {
    id: i64,
    name: String,
    status: ProcessingStatus,
    last_run: Option<DateTime<Utc>>,
    summary: String,
    counts: LoadCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let db = Db::new(config.db_path());

    let migrations_dir = args.migrations.clone();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;

    if let Some(id) = args.log {
        let run_config = queries::get_run_config(&db, id).await?;
        println!("{}", run_config.logfile);
        return Ok(());
    }

    let mut rows = Vec::new();
    for run_config in queries::list_run_configs(&db).await? {
        let counts = queries::load_record_counts(&db, run_config.id).await?;
        rows.push(StatusRow {
            id: run_config.id,
            name: run_config.name,
            status: run_config.status,
            last_run: run_config.last_run,
            summary: run_config.summary,
            counts,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No scanner has run yet.");
        return Ok(());
    }

    println!("{:-<100}", "");
    println!(
        "{:<4} {:<20} {:<11} {:<20} {:>8} {:>8} {:>8} {:>8}",
        "Id", "Name", "Status", "Last run", "Load ok", "Load nok", "Msg ok", "Msg nok"
    );
    println!("{:-<100}", "");
    for row in &rows {
        let last_run = row
            .last_run
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<4} {:<20} {:<11} {:<20} {:>8} {:>8} {:>8} {:>8}",
            row.id,
            row.name,
            row.status.as_str(),
            last_run,
            row.counts.load_records_ok,
            row.counts.load_records_nok,
            row.counts.messages_ok,
            row.counts.messages_nok
        );
        if !row.summary.is_empty() {
            println!("     {}", row.summary);
        }
    }
    println!("{:-<100}", "");

    Ok(())
}
