pub mod snapshot;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use snapshot::SnapshotXmlParser;

/// Fields extracted from one snapshot message
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_date: Option<DateTime<Utc>>,
    pub normalized_content: String,
    pub sequence_number: i64,
    pub object_ref: Option<String>,
}

/// Errors raised while parsing a message
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("message is empty")]
    Empty,

    #[error("malformed XML at byte {position}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("no root element found")]
    NoRootElement,

    #[error("element <{0}> is not closed")]
    Unclosed(String),

    #[error("unknown entity reference &{0};")]
    UnknownEntity(String),

    #[error("required element <{0}> not found")]
    MissingElement(&'static str),

    #[error("invalid date {value:?}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("invalid sequence number {value:?}")]
    InvalidSequence {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("failed to write normalized XML: {0}")]
    Write(String),

    /// Failures from parsers outside this crate
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Extracts the staging fields from the raw content of a message file.
pub trait MessageParser {
    fn parse(&self, content: &str) -> std::result::Result<ParsedMessage, ParseError>;
}

impl<P: MessageParser + ?Sized> MessageParser for &P {
    fn parse(&self, content: &str) -> std::result::Result<ParsedMessage, ParseError> {
        (**self).parse(content)
    }
}
