//! Staging records written by a scan run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a configured scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Waiting,
    Processing,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Waiting => "WAITING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(ProcessingStatus::Waiting),
            "PROCESSING" => Some(ProcessingStatus::Processing),
            "ERROR" => Some(ProcessingStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of staging a file or a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagingStatus {
    StagingOk,
    StagingNok,
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::StagingOk => "STAGING_OK",
            StagingStatus::StagingNok => "STAGING_NOK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STAGING_OK" => Some(StagingStatus::StagingOk),
            "STAGING_NOK" => Some(StagingStatus::StagingNok),
            _ => None,
        }
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured scanner instance and the state of its latest run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub id: i64,
    pub name: String,
    pub scan_directory: PathBuf,
    pub archive_directory: Option<PathBuf>,
    pub status: ProcessingStatus,
    /// Cumulative transcript of all runs.
    pub logfile: String,
    pub summary: String,
    pub last_run: Option<DateTime<Utc>>,
}

impl RunConfig {
    pub fn new(id: i64, name: impl Into<String>, scan_directory: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            scan_directory: scan_directory.into(),
            archive_directory: None,
            status: ProcessingStatus::Waiting,
            logfile: String::new(),
            summary: String::new(),
            last_run: None,
        }
    }

    pub fn with_archive_directory(mut self, archive_directory: impl Into<PathBuf>) -> Self {
        self.archive_directory = Some(archive_directory.into());
        self
    }
}

/// One attempt to load a file.
#[derive(Debug, Clone)]
pub struct LoadRecord {
    pub id: Option<i64>,
    /// Base name of the file; together with `source_kind` the duplicate key.
    pub file_name: String,
    pub source_kind: String,
    pub status: StagingStatus,
    pub remark: String,
    pub file_date: Option<DateTime<Utc>>,
    /// SHA-256 of the raw file bytes.
    pub content_hash: String,
    pub run_config_id: i64,
}

/// A staged snapshot message.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: Option<i64>,
    pub load_record_id: Option<i64>,
    pub source_kind: String,
    pub message_date: DateTime<Utc>,
    pub raw_content: String,
    pub content: Option<String>,
    pub sequence_number: Option<i64>,
    object_ref: Option<String>,
    status: StagingStatus,
    pub status_date: DateTime<Utc>,
    pub remark: String,
}

impl MessageRecord {
    /// A message that has not been parsed yet; it stays `STAGING_NOK` until
    /// an object reference is set.
    pub fn new(
        source_kind: impl Into<String>,
        raw_content: String,
        message_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            load_record_id: None,
            source_kind: source_kind.into(),
            message_date,
            raw_content,
            content: None,
            sequence_number: None,
            object_ref: None,
            status: StagingStatus::StagingNok,
            status_date: Utc::now(),
            remark: String::new(),
        }
    }

    /// Sets the object reference. Status follows it: ok iff non-empty.
    pub fn set_object_ref(&mut self, object_ref: Option<String>) {
        self.object_ref = object_ref.filter(|r| !r.is_empty());
        self.status = if self.object_ref.is_some() {
            StagingStatus::StagingOk
        } else {
            StagingStatus::StagingNok
        };
        self.status_date = Utc::now();
    }

    pub fn object_ref(&self) -> Option<&str> {
        self.object_ref.as_deref()
    }

    pub fn status(&self) -> StagingStatus {
        self.status
    }
}
