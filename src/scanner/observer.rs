use crate::error::ScannerError;

/// Receives progress of a scan run. Every method defaults to doing nothing,
/// except `exception`, which logs the error.
pub trait ProgressObserver {
    fn total(&mut self, _total: u64) {}

    fn progress(&mut self, _progress: u64) {}

    fn update_status(&mut self, _status: &str) {}

    fn add_log(&mut self, _line: &str) {}

    fn exception(&mut self, error: &ScannerError) {
        log::error!("{}", error);
    }
}

/// Observer for runs nobody is watching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}
