use rusqlite::{params, Connection, OptionalExtension};

use super::queries;
use crate::error::Result;
use crate::model::{LoadRecord, MessageRecord, RunConfig};
use crate::scanner::StagingStore;

/// A single SQLite connection holding the open write transaction of a scan run.
///
/// The transaction is opened on creation and reopened after every commit.
/// Dropping the session rolls back whatever was not committed.
pub struct StagingSession {
    conn: Connection,
    in_transaction: bool,
    commits: usize,
}

impl StagingSession {
    pub fn begin(conn: Connection) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            in_transaction: true,
            commits: 0,
        })
    }

    /// Number of commits performed so far.
    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn load_run_config(&self, id: i64) -> Result<Option<RunConfig>> {
        queries::fetch_run_config(&self.conn, id)
    }
}

impl StagingStore for StagingSession {
    fn load_record_exists(&self, file_name: &str, source_kind: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM load_records WHERE file_name = ?1 AND source_kind = ?2 LIMIT 1",
                params![file_name, source_kind],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_load_record(&mut self, record: &LoadRecord) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO load_records (
                file_name, source_kind, status, remark, file_date, content_hash, run_config_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.file_name,
                record.source_kind,
                record.status.as_str(),
                record.remark,
                record.file_date.map(|d| d.to_rfc3339()),
                record.content_hash,
                record.run_config_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_message(&mut self, message: &MessageRecord) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO messages (
                load_record_id, source_kind, message_date, raw_content, content,
                sequence_number, object_ref, status, status_date, remark
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                message.load_record_id,
                message.source_kind,
                message.message_date.to_rfc3339(),
                message.raw_content,
                message.content,
                message.sequence_number,
                message.object_ref(),
                message.status().as_str(),
                message.status_date.to_rfc3339(),
                message.remark,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn save_run_config(&mut self, config: &RunConfig) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO run_configs (
                id, name, scan_directory, archive_directory, status, logfile, summary, last_run
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                scan_directory = excluded.scan_directory,
                archive_directory = excluded.archive_directory,
                status = excluded.status,
                logfile = excluded.logfile,
                summary = excluded.summary,
                last_run = excluded.last_run
            "#,
            params![
                config.id,
                config.name,
                config.scan_directory.to_string_lossy().to_string(),
                config.archive_directory.as_ref().map(|p| p.to_string_lossy().to_string()),
                config.status.as_str(),
                config.logfile,
                config.summary,
                config.last_run.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        self.commits += 1;
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        // some failures already end the transaction inside SQLite
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.in_transaction = false;
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }
}

impl Drop for StagingSession {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback of staging session failed: {}", e);
            }
        }
    }
}
