//! Directory scanner: stages every new message file of a scan directory.
//!
//! A run lists the directory, skips files that were loaded before, parses the
//! rest into load records and messages, commits in pages of
//! [`COMMIT_PAGE_SIZE`] files and optionally moves each scanned file to an
//! archive directory. Progress goes to a [`ProgressObserver`] and into the
//! cumulative log of the [`RunConfig`](crate::model::RunConfig).

pub mod archive;
pub mod catalog;
pub mod committer;
pub mod duplicate;
pub mod ingestor;
pub mod observer;
pub mod run;
mod store;

pub use archive::{ArchiveOutcome, Archiver};
pub use catalog::{list_files, validate_scan_directory, CatalogEntry};
pub use committer::{BatchCommitter, FinalCommit, COMMIT_PAGE_SIZE};
pub use duplicate::{file_name_for, is_duplicate};
pub use ingestor::{MessageIngestor, StagedFile};
pub use observer::{NoopObserver, ProgressObserver};
pub use run::{RunReport, ScanOptions, ScanRun};
pub use store::StagingStore;

use crate::db::Db;
use crate::error::Result;
use crate::model::RunConfig;
use crate::parser::MessageParser;

/// Source kind tag of BRK snapshot messages.
pub const SOURCE_KIND_BRK: &str = "brk";

pub const LOG_NEWLINE: &str = "\n";

pub(crate) const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Run one scan on a fresh staging session of `db`.
///
/// The session lives exactly as long as the run; anything not committed when
/// the run fails is rolled back.
pub fn scan_directory<P: MessageParser>(
    db: &Db,
    config: &mut RunConfig,
    parser: P,
    options: ScanOptions,
    observer: &mut dyn ProgressObserver,
) -> Result<RunReport> {
    let mut session = db.session()?;
    ScanRun::new(config, &mut session, parser, observer)
        .with_options(options)
        .execute()
}
