use std::path::{Path, PathBuf};

use super::StagingStore;
use crate::error::Result;
use crate::model::RunConfig;

/// Number of ingested files after which the open transaction is committed.
pub const COMMIT_PAGE_SIZE: usize = 1000;

/// Splits the writes of one run into bounded transactions.
///
/// The files of the open page are held back until their records are
/// committed. A run that fails mid-page leaves those files in the scan
/// directory, so the next run picks them up again.
pub struct BatchCommitter<'s, S: StagingStore + ?Sized> {
    store: &'s mut S,
    page: Vec<PathBuf>,
    batches: Vec<usize>,
}

/// Outcome of the final commit of a run
#[derive(Debug)]
pub struct FinalCommit {
    /// Ingested files per committed transaction, final commit last.
    pub batches: Vec<usize>,
    /// Files of the last page, durable now.
    pub committed: Vec<PathBuf>,
}

impl<'s, S: StagingStore + ?Sized> BatchCommitter<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            page: Vec::new(),
            batches: Vec::new(),
        }
    }

    pub fn store(&self) -> &S {
        &*self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut *self.store
    }

    /// Add an ingested file to the open page; commits (with the current run
    /// config) once the page is full.
    ///
    /// Returns the files of the page when this call committed it.
    pub fn record_ingested(&mut self, config: &RunConfig, file: &Path) -> Result<Option<Vec<PathBuf>>> {
        self.page.push(file.to_path_buf());
        if self.page.len() < COMMIT_PAGE_SIZE {
            return Ok(None);
        }
        log::debug!("Commit page size of {} reached, committing", COMMIT_PAGE_SIZE);
        self.commit_page(config).map(Some)
    }

    /// Final commit; always happens, even when the last page is empty.
    pub fn finish(mut self, config: &RunConfig) -> Result<FinalCommit> {
        let committed = self.commit_page(config)?;
        Ok(FinalCommit {
            batches: self.batches,
            committed,
        })
    }

    fn commit_page(&mut self, config: &RunConfig) -> Result<Vec<PathBuf>> {
        self.store.save_run_config(config)?;
        self.store.commit()?;
        self.batches.push(self.page.len());
        Ok(std::mem::take(&mut self.page))
    }
}
