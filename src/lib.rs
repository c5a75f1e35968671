pub mod config;
pub mod error;
pub mod db;
pub mod model;
pub mod parser;
pub mod scanner;

pub use config::Config;
pub use error::{ScannerError, Result};
pub use model::{LoadRecord, MessageRecord, ProcessingStatus, RunConfig, StagingStatus};
pub use scanner::{scan_directory, ProgressObserver, RunReport, ScanOptions};
