//! Read-side queries over the staging tables.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::PathBuf;

use super::Db;
use crate::error::{Result, ScannerError};
use crate::model::{ProcessingStatus, RunConfig};

const RUN_CONFIG_COLUMNS: &str =
    "id, name, scan_directory, archive_directory, status, logfile, summary, last_run";

/// Load and message counts for one run configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadCounts {
    pub load_records_ok: u64,
    pub load_records_nok: u64,
    pub messages_ok: u64,
    pub messages_nok: u64,
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(ScannerError::Config(msg)))
}

pub(crate) fn run_config_from_row(row: &Row<'_>) -> rusqlite::Result<RunConfig> {
    let status: String = row.get(4)?;
    let status = ProcessingStatus::parse(&status)
        .ok_or_else(|| conversion_error(4, format!("unknown processing status {:?}", status)))?;

    let last_run: Option<String> = row.get(7)?;
    let last_run = last_run
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(7, format!("invalid last_run {:?}: {}", s, e)))
        })
        .transpose()?;

    Ok(RunConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        scan_directory: PathBuf::from(row.get::<_, String>(2)?),
        archive_directory: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
        status,
        logfile: row.get(5)?,
        summary: row.get(6)?,
        last_run,
    })
}

pub fn fetch_run_config(conn: &Connection, id: i64) -> Result<Option<RunConfig>> {
    let sql = format!("SELECT {} FROM run_configs WHERE id = ?1", RUN_CONFIG_COLUMNS);
    let config = conn
        .query_row(&sql, params![id], run_config_from_row)
        .optional()?;
    Ok(config)
}

pub fn fetch_run_configs(conn: &Connection) -> Result<Vec<RunConfig>> {
    let sql = format!("SELECT {} FROM run_configs ORDER BY id", RUN_CONFIG_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let configs = stmt
        .query_map([], run_config_from_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(configs)
}

pub fn fetch_load_counts(conn: &Connection, run_config_id: i64) -> Result<LoadCounts> {
    let mut counts = LoadCounts::default();

    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM load_records WHERE run_config_id = ?1 GROUP BY status",
    )?;
    let rows = stmt.query_map(params![run_config_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, n) = row?;
        match status.as_str() {
            "STAGING_OK" => counts.load_records_ok = n as u64,
            _ => counts.load_records_nok += n as u64,
        }
    }

    let mut stmt = conn.prepare(
        "SELECT m.status, COUNT(*) FROM messages m \
         JOIN load_records l ON l.id = m.load_record_id \
         WHERE l.run_config_id = ?1 GROUP BY m.status",
    )?;
    let rows = stmt.query_map(params![run_config_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, n) = row?;
        match status.as_str() {
            "STAGING_OK" => counts.messages_ok = n as u64,
            _ => counts.messages_nok += n as u64,
        }
    }

    Ok(counts)
}

/// All run configurations, ordered by id
pub async fn list_run_configs(db: &Db) -> Result<Vec<RunConfig>> {
    db.with_connection(|conn| fetch_run_configs(conn)).await
}

pub async fn get_run_config(db: &Db, id: i64) -> Result<RunConfig> {
    db.with_connection(move |conn| fetch_run_config(conn, id)?.ok_or(ScannerError::RunNotFound(id)))
        .await
}

pub async fn load_record_counts(db: &Db, run_config_id: i64) -> Result<LoadCounts> {
    db.with_connection(move |conn| fetch_load_counts(conn, run_config_id)).await
}
