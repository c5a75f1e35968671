use crate::error::Result;
use crate::model::{LoadRecord, MessageRecord, RunConfig};

/// Persistence seen by a scan run.
///
/// Implementations hold one open unit of work; `commit` makes everything
/// written so far durable and starts the next one.
pub trait StagingStore {
    /// True if any load record exists for this file name and source kind.
    fn load_record_exists(&self, file_name: &str, source_kind: &str) -> Result<bool>;

    /// Returns the id of the new record.
    fn insert_load_record(&mut self, record: &LoadRecord) -> Result<i64>;

    /// Returns the id of the new message.
    fn insert_message(&mut self, message: &MessageRecord) -> Result<i64>;

    /// Inserts or updates the run configuration.
    fn save_run_config(&mut self, config: &RunConfig) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    /// Discards everything written since the last commit.
    fn rollback(&mut self) -> Result<()>;
}
