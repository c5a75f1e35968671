use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

use super::duplicate::file_name_for;
use super::TIMESTAMP_FORMAT;
use crate::model::{LoadRecord, MessageRecord, StagingStatus};
use crate::parser::MessageParser;

pub const REMARK_READY: &str = "ready for processing";
pub const REMARK_NO_OBJECT_REF: &str = "object reference not found, contact supplier";

/// Records produced from one message file, not yet persisted
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub load_record: LoadRecord,
    pub message: MessageRecord,
    pub parse_failed: bool,
}

/// Turns one message file into a load record and a staged message.
pub struct MessageIngestor<'a, P: MessageParser + ?Sized> {
    parser: &'a P,
    source_kind: &'a str,
    run_config_id: i64,
}

impl<'a, P: MessageParser + ?Sized> MessageIngestor<'a, P> {
    pub fn new(parser: &'a P, source_kind: &'a str, run_config_id: i64) -> Self {
        Self {
            parser,
            source_kind,
            run_config_id,
        }
    }

    pub fn source_kind(&self) -> &str {
        self.source_kind
    }

    /// Read and parse `path`.
    ///
    /// Parse failures are recorded on the message (`STAGING_NOK`); only
    /// failures to read the file are returned as errors.
    pub fn ingest(&self, path: &Path) -> io::Result<StagedFile> {
        let loaded_at = Utc::now();
        let bytes = fs::read(path)?;
        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        let content = decode_content(bytes)?;

        let file_date = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let load_record = LoadRecord {
            id: None,
            file_name: file_name_for(path),
            source_kind: self.source_kind.to_string(),
            status: StagingStatus::StagingOk,
            remark: format!(
                "file loaded from {} on {}",
                absolute.display(),
                loaded_at.format(TIMESTAMP_FORMAT)
            ),
            file_date,
            content_hash,
            run_config_id: self.run_config_id,
        };

        let mut message = MessageRecord::new(self.source_kind, content, loaded_at);
        let parse_failed = match self.parser.parse(&message.raw_content) {
            Ok(parsed) => {
                if let Some(date) = parsed.message_date {
                    message.message_date = date;
                }
                message.content = Some(parsed.normalized_content);
                message.sequence_number = Some(parsed.sequence_number);
                message.set_object_ref(parsed.object_ref);
                message.remark = if message.object_ref().is_some() {
                    REMARK_READY.to_string()
                } else {
                    REMARK_NO_OBJECT_REF.to_string()
                };
                false
            }
            Err(e) => {
                message.set_object_ref(None);
                message.remark = format!(
                    "error parsing message (file {}): {:?}",
                    path.display(),
                    anyhow::Error::new(e)
                );
                log::warn!("{}", message.remark);
                true
            }
        };

        Ok(StagedFile {
            load_record,
            message,
            parse_failed,
        })
    }
}

/// Truncate at the first NUL byte and decode as UTF-8.
///
/// Partially transferred files are often padded with NULs; nothing after the
/// first one is kept.
pub fn decode_content(mut bytes: Vec<u8>) -> io::Result<String> {
    if let Some(nul) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(nul);
    }
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
