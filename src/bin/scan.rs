//! Run one scan of the configured directory and stage every new snapshot message.

use anyhow::{Context, Result};
use brkscan::db::{migrate, queries, Db};
use brkscan::parser::SnapshotXmlParser;
use brkscan::scanner::{scan_directory, ProgressObserver, ScanOptions};
use brkscan::{Config, RunConfig, ScannerError};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scan")]
#[command(about = "Stage new BRK snapshot messages from the scan directory")]
struct Args {
    /// Leave scanned files in place, even if an archive directory is configured
    #[arg(long)]
    no_archive: bool,

    /// Print the run log to stdout while scanning
    #[arg(short, long)]
    verbose: bool,

    /// Directory containing the SQL migrations
    #[arg(long, default_value = "migrations")]
    migrations: PathBuf,
}

/// Reports progress on the console
struct ConsoleObserver {
    verbose: bool,
    total: u64,
}

impl ProgressObserver for ConsoleObserver {
    fn total(&mut self, total: u64) {
        self.total = total;
    }

    fn progress(&mut self, progress: u64) {
        if progress % 100 == 0 || progress == self.total {
            log::info!("Progress: {}/{}", progress, self.total);
        }
    }

    fn add_log(&mut self, line: &str) {
        if self.verbose {
            println!("{}", line);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", &config.staging.log_level),
    )
    .init();

    log::info!("Scan directory: {}", config.scan_directory().display());
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    let migrations_dir = args.migrations.clone();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;

    let scanner = &config.scanner;
    let mut run_config = match queries::get_run_config(&db, scanner.id).await {
        Ok(existing) => existing,
        Err(ScannerError::RunNotFound(id)) => {
            log::info!("Creating run configuration {} ({})", id, scanner.name);
            RunConfig::new(id, scanner.name.clone(), scanner.scan_directory.clone())
        }
        Err(e) => return Err(e.into()),
    };
    // config.toml is authoritative for the directories
    run_config.name = scanner.name.clone();
    run_config.scan_directory = scanner.scan_directory.clone();
    run_config.archive_directory = scanner.archive_directory.clone();

    let options = ScanOptions {
        source_kind: scanner.source_kind.clone(),
        extension: scanner.extension.clone(),
        archive: !args.no_archive,
    };
    let run_id = run_config.id;
    let verbose = args.verbose;

    // The run is blocking from start to end; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || {
        let mut observer = ConsoleObserver { verbose, total: 0 };
        scan_directory(&db, &mut run_config, SnapshotXmlParser, options, &mut observer)
    })
    .await
    .context("scan task failed")?;

    let report = result.with_context(|| format!("Scan {} failed", run_id))?;

    log::info!("=== Scan Complete ===");
    log::info!("Files found: {}", report.files_found);
    log::info!("  Already processed: {}", report.already_processed);
    log::info!("  Loaded: {} (parse failures: {})", report.loaded, report.parse_failures);
    if report.unreadable > 0 {
        log::warn!("  Unreadable (skipped): {}", report.unreadable);
    }
    if report.archiving_enabled {
        log::info!("Archived: {}", report.archived);
    }
    if report.archive_failures > 0 {
        log::warn!("Files that could not be archived: {}", report.archive_failures);
    }
    log::info!("Commits: {}", report.batches.len());

    println!("{}", report.summary());
    Ok(())
}
