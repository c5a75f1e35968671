use chrono::Utc;
use serde::Serialize;
use std::io;
use std::path::Path;

use super::archive::{ArchiveOutcome, Archiver};
use super::catalog::CatalogEntry;
use super::committer::BatchCommitter;
use super::ingestor::MessageIngestor;
use super::observer::ProgressObserver;
use super::{catalog, duplicate, StagingStore, LOG_NEWLINE, SOURCE_KIND_BRK, TIMESTAMP_FORMAT};
use crate::error::{Result, ScannerError};
use crate::model::{ProcessingStatus, RunConfig};
use crate::parser::MessageParser;

pub const ERROR_SUMMARY: &str = "an error occurred, see the log for details";

/// Per-run settings that are not part of the persisted run configuration
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub source_kind: String,
    /// Without leading dot, matched case-insensitively.
    pub extension: String,
    /// When false the configured archive directory is ignored for this run.
    pub archive: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            source_kind: SOURCE_KIND_BRK.to_string(),
            extension: "xml".to_string(),
            archive: true,
        }
    }
}

/// Counters of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub files_found: usize,
    pub already_processed: usize,
    pub loaded: usize,
    /// Loaded files whose message could not be parsed (included in `loaded`).
    pub parse_failures: usize,
    pub unreadable: usize,
    pub archiving_enabled: bool,
    pub archived: usize,
    pub archive_failures: usize,
    /// Ingested files per committed transaction, final commit last.
    pub batches: Vec<usize>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        summary_text(self.already_processed, self.loaded)
    }
}

pub fn summary_text(already_processed: usize, loaded: usize) -> String {
    format!("already processed: {}, loaded: {}", already_processed, loaded)
}

fn join_log(previous: &str, run: &str) -> String {
    if previous.is_empty() {
        run.to_string()
    } else {
        format!("{}{}{}", previous, LOG_NEWLINE, run)
    }
}

/// Run transcript, mirrored to the `log` facade and the observer.
struct Transcript<'o> {
    observer: &'o mut dyn ProgressObserver,
    text: String,
}

impl<'o> Transcript<'o> {
    fn new(observer: &'o mut dyn ProgressObserver) -> Self {
        Self {
            observer,
            text: String::new(),
        }
    }

    fn info(&mut self, msg: String) {
        log::info!("{}", msg);
        self.observer.add_log(&msg);
        self.push(&msg);
    }

    fn warn(&mut self, msg: String) {
        log::warn!("{}", msg);
        self.observer.add_log(&msg);
        self.push(&msg);
    }

    fn error(&mut self, err: &ScannerError) {
        log::error!("{}", err);
        self.push(&err.to_string());
        self.observer.exception(err);
    }

    fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push_str(LOG_NEWLINE);
    }
}

/// One scan of one configured directory.
///
/// State machine on `RunConfig::status`: `WAITING -> PROCESSING -> WAITING`
/// on completion, or `-> ERROR` when the scan directory fails validation.
pub struct ScanRun<'a, S: StagingStore + ?Sized, P: MessageParser> {
    config: &'a mut RunConfig,
    store: &'a mut S,
    parser: P,
    observer: &'a mut dyn ProgressObserver,
    options: ScanOptions,
}

impl<'a, S: StagingStore + ?Sized, P: MessageParser> ScanRun<'a, S, P> {
    pub fn new(
        config: &'a mut RunConfig,
        store: &'a mut S,
        parser: P,
        observer: &'a mut dyn ProgressObserver,
    ) -> Self {
        Self {
            config,
            store,
            parser,
            observer,
            options: ScanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Scan the directory once.
    ///
    /// A scan directory that cannot be listed or a failing store ends the run
    /// with an error, after the ERROR state has been recorded. Problems with
    /// single files or the archive are recorded and the run goes on.
    pub fn execute(self) -> Result<RunReport> {
        let ScanRun {
            config,
            store,
            parser,
            observer,
            options,
        } = self;

        let previous_log = config.logfile.clone();
        let mut transcript = Transcript::new(observer);
        let mut report = RunReport::default();

        config.status = ProcessingStatus::Processing;
        transcript.info(format!(
            "Scanner {} (id {}) started on {}.",
            config.name,
            config.id,
            Utc::now().format(TIMESTAMP_FORMAT)
        ));
        if let Err(err) = store.save_run_config(config) {
            return Err(abort(config, store, &mut transcript, &previous_log, err));
        }

        let scan_directory = config.scan_directory.clone();
        if let Err(err) = catalog::validate_scan_directory(&scan_directory) {
            return Err(abort(config, store, &mut transcript, &previous_log, err));
        }

        let archiver = match (&config.archive_directory, options.archive) {
            (Some(dir), true) => match Archiver::prepare(dir, &scan_directory) {
                Ok(archiver) => Some(archiver),
                Err(err) => {
                    transcript.error(&err);
                    None
                }
            },
            _ => None,
        };
        report.archiving_enabled = archiver.is_some();

        let files = match catalog::list_files(&scan_directory, &options.extension) {
            Ok(files) => files,
            Err(err) => return Err(abort(config, store, &mut transcript, &previous_log, err)),
        };
        report.files_found = files.len();
        transcript.observer.total(files.len() as u64);

        let ingestor = MessageIngestor::new(&parser, &options.source_kind, config.id);
        let mut committer = BatchCommitter::new(&mut *store);

        let staged = stage_files(
            &files,
            &ingestor,
            &mut committer,
            archiver.as_ref(),
            config,
            &mut transcript,
            &mut report,
        );
        let finished = staged.and_then(|()| {
            if archiver.is_none() {
                close_run(config, &mut transcript, &report, &previous_log);
            }
            committer.finish(config)
        });
        let last_page = match finished {
            Ok(last_page) => last_page,
            Err(err) => return Err(abort(config, store, &mut transcript, &previous_log, err)),
        };
        report.batches = last_page.batches;

        // files of the last page are durable only after the final commit
        if let Some(archiver) = &archiver {
            for file in &last_page.committed {
                archive_file(archiver, file, &mut transcript, &mut report);
            }
            close_run(config, &mut transcript, &report, &previous_log);
            if let Err(err) = store.save_run_config(config).and_then(|()| store.commit()) {
                return Err(abort(config, store, &mut transcript, &previous_log, err));
            }
        }

        Ok(report)
    }
}

/// Duplicate check, ingest and persist every listed file.
///
/// Duplicates and unreadable files are archived right away. Ingested files
/// are archived once the page holding their records is committed.
fn stage_files<S: StagingStore + ?Sized, P: MessageParser + ?Sized>(
    files: &[CatalogEntry],
    ingestor: &MessageIngestor<'_, P>,
    committer: &mut BatchCommitter<'_, S>,
    archiver: Option<&Archiver>,
    config: &RunConfig,
    transcript: &mut Transcript<'_>,
    report: &mut RunReport,
) -> Result<()> {
    for (idx, file) in files.iter().enumerate() {
        let path = &file.path;
        transcript.info(format!(
            "File {} found in {}.",
            path.display(),
            config.scan_directory.display()
        ));

        let mut move_now = true;
        if duplicate::is_duplicate(committer.store(), path, ingestor.source_kind())? {
            transcript.info(format!("  File {} is a duplicate and is skipped.", path.display()));
            report.already_processed += 1;
        } else {
            match ingestor.ingest(path) {
                Ok(mut staged) => {
                    let store = committer.store_mut();
                    let load_record_id = store.insert_load_record(&staged.load_record)?;
                    staged.load_record.id = Some(load_record_id);
                    staged.message.load_record_id = Some(load_record_id);
                    let message_id = store.insert_message(&staged.message)?;

                    report.loaded += 1;
                    if staged.parse_failed {
                        report.parse_failures += 1;
                    }
                    transcript.info(format!(
                        "  File {} is loaded with status {}. (message id {}, status {}.)",
                        path.display(),
                        staged.load_record.status,
                        message_id,
                        staged.message.status()
                    ));

                    move_now = false;
                    if let Some(page) = committer.record_ingested(config, path)? {
                        if let Some(archiver) = archiver {
                            for committed in &page {
                                archive_file(archiver, committed, transcript, report);
                            }
                        }
                    }
                }
                Err(e) => {
                    report.unreadable += 1;
                    let err = ScannerError::Io(io::Error::new(
                        e.kind(),
                        format!("cannot read {}: {}", path.display(), e),
                    ));
                    transcript.error(&err);
                }
            }
        }

        if move_now {
            if let Some(archiver) = archiver {
                archive_file(archiver, path, transcript, report);
            }
        }

        transcript.observer.progress(idx as u64 + 1);
    }
    Ok(())
}

fn archive_file(archiver: &Archiver, path: &Path, transcript: &mut Transcript<'_>, report: &mut RunReport) {
    match archiver.archive(path) {
        ArchiveOutcome::Moved(target) => {
            report.archived += 1;
            transcript.info(format!(
                "  File {} is moved to {}.",
                path.display(),
                target.display()
            ));
        }
        ArchiveOutcome::Failed(e) => {
            report.archive_failures += 1;
            transcript.warn(format!(
                "  File {} could not be moved to archive {}: {}",
                path.display(),
                archiver.directory().display(),
                e
            ));
        }
    }
}

/// Narrate the end of the run and put the run config in its WAITING state.
fn close_run(config: &mut RunConfig, transcript: &mut Transcript<'_>, report: &RunReport, previous_log: &str) {
    let finished = Utc::now();
    let msg = format!("Run finished on {}.", finished.format(TIMESTAMP_FORMAT));
    transcript.info(msg.clone());
    transcript.observer.update_status(&msg);
    transcript.observer.add_log("\n\n**** result ****");
    transcript.observer.add_log(&format!(
        "\nFiles already loaded: {}",
        report.already_processed
    ));
    transcript.observer.add_log(&format!("\nFiles loaded: {}\n", report.loaded));

    config.status = ProcessingStatus::Waiting;
    config.last_run = Some(finished);
    config.summary = report.summary();
    config.logfile = join_log(
        previous_log,
        &format!("{}{}{}", transcript.text, config.summary, LOG_NEWLINE),
    );
}

/// Record a failed run on the run config and hand the error back.
///
/// The open page is rolled back first; the ERROR state is then committed on
/// its own.
fn abort<S: StagingStore + ?Sized>(
    config: &mut RunConfig,
    store: &mut S,
    transcript: &mut Transcript<'_>,
    previous_log: &str,
    err: ScannerError,
) -> ScannerError {
    config.status = ProcessingStatus::Error;
    config.summary = ERROR_SUMMARY.to_string();
    transcript.error(&err);
    config.logfile = join_log(previous_log, &transcript.text);

    let persisted = store
        .rollback()
        .and_then(|()| store.save_run_config(config))
        .and_then(|()| store.commit());
    if let Err(db_err) = persisted {
        log::error!("Could not record failed run {}: {}", config.id, db_err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::db::{Db, StagingSession};
    use crate::parser::SnapshotXmlParser;
    use crate::scanner::{scan_directory, NoopObserver, COMMIT_PAGE_SIZE};
    use rusqlite::params;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingObserver {
        total: Option<u64>,
        progress: Vec<u64>,
        logs: Vec<String>,
        statuses: Vec<String>,
        exceptions: Vec<String>,
    }

    impl ProgressObserver for RecordingObserver {
        fn total(&mut self, total: u64) {
            self.total = Some(total);
        }
        fn progress(&mut self, progress: u64) {
            self.progress.push(progress);
        }
        fn update_status(&mut self, status: &str) {
            self.statuses.push(status.to_string());
        }
        fn add_log(&mut self, line: &str) {
            self.logs.push(line.to_string());
        }
        fn exception(&mut self, error: &ScannerError) {
            self.exceptions.push(error.to_string());
        }
    }

    fn snapshot(object_ref: &str, sequence: u32) -> String {
        format!(
            "<snapshot><toestandsdatum>2024-03-01</toestandsdatum>\
             <volgnummer>{}</volgnummer><identificatie>{}</identificatie></snapshot>",
            sequence, object_ref
        )
    }

    fn scan_dir(temp_dir: &TempDir) -> PathBuf {
        let dir = temp_dir.path().join("in");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run(db: &Db, config: &mut RunConfig, observer: &mut RecordingObserver) -> crate::error::Result<RunReport> {
        scan_directory(db, config, SnapshotXmlParser, ScanOptions::default(), observer)
    }

    fn count(db: &Db, sql: &str) -> i64 {
        db.open_connection().unwrap().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    fn message_status(db: &Db, file_name: &str) -> (String, String) {
        db.open_connection()
            .unwrap()
            .query_row(
                "SELECT m.status, m.remark FROM messages m \
                 JOIN load_records l ON l.id = m.load_record_id WHERE l.file_name = ?1",
                params![file_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
    }

    fn write_abc(dir: &Path) {
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();
        fs::write(dir.join("b.xml"), "<snapshot><volgnummer>2</wrong>").unwrap();
        fs::write(dir.join("c.txt"), "ignored").unwrap();
    }

    #[test]
    fn test_valid_malformed_and_ignored_files() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        write_abc(&dir);

        let mut config = RunConfig::new(1, "brk", &dir);
        let mut observer = RecordingObserver::default();
        let report = run(&db, &mut config, &mut observer).unwrap();

        assert_eq!(report.files_found, 2);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.already_processed, 0);
        assert_eq!(config.summary, "already processed: 0, loaded: 2");
        assert_eq!(config.status, ProcessingStatus::Waiting);
        assert!(config.last_run.is_some());

        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records WHERE status = 'STAGING_OK'"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM messages"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records WHERE file_name = 'c.txt'"), 0);

        let (status, remark) = message_status(&db, "a.xml");
        assert_eq!(status, "STAGING_OK");
        assert_eq!(remark, "ready for processing");
        let (status, remark) = message_status(&db, "b.xml");
        assert_eq!(status, "STAGING_NOK");
        assert!(remark.contains("error parsing message"));

        assert_eq!(fs::read_to_string(dir.join("c.txt")).unwrap(), "ignored");
        assert!(observer.exceptions.is_empty());

        let stored = StagingSession::begin(db.open_connection().unwrap())
            .unwrap()
            .load_run_config(1)
            .unwrap()
            .unwrap();
        assert_eq!(stored.summary, "already processed: 0, loaded: 2");
        assert_eq!(stored.status, ProcessingStatus::Waiting);
    }

    #[test]
    fn test_status_ok_iff_object_ref() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();
        fs::write(dir.join("b.xml"), snapshot("", 2)).unwrap();
        fs::write(dir.join("c.xml"), "<snapshot><volgnummer>3</volgnummer></snapshot>").unwrap();

        let mut config = RunConfig::new(1, "brk", &dir);
        run(&db, &mut config, &mut RecordingObserver::default()).unwrap();

        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM messages WHERE status = 'STAGING_OK' AND object_ref <> ''"),
            1
        );
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM messages WHERE status = 'STAGING_NOK' AND object_ref IS NULL"),
            2
        );
        assert_eq!(message_status(&db, "c.xml").1, "object reference not found, contact supplier");
    }

    #[test]
    fn test_rerun_skips_loaded_file() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();

        let mut config = RunConfig::new(1, "brk", &dir);
        run(&db, &mut config, &mut RecordingObserver::default()).unwrap();

        let mut observer = RecordingObserver::default();
        let report = run(&db, &mut config, &mut observer).unwrap();
        assert_eq!(config.summary, "already processed: 1, loaded: 0");
        assert_eq!(report.loaded, 0);
        assert!(observer.logs.iter().any(|l| l.contains("is a duplicate and is skipped")));
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 1);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        write_abc(&dir);

        let mut config = RunConfig::new(1, "brk", &dir);
        run(&db, &mut config, &mut RecordingObserver::default()).unwrap();
        let first_log = config.logfile.clone();

        let report = run(&db, &mut config, &mut RecordingObserver::default()).unwrap();
        assert_eq!(report.loaded, 0);
        assert_eq!(report.already_processed, 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM messages"), 2);

        // the log accumulates over runs
        assert!(config.logfile.starts_with(&first_log));
        assert!(config.logfile.ends_with("already processed: 2, loaded: 0\n"));
    }

    #[test]
    fn test_commit_boundaries_for_large_backlog() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        for i in 0..2500 {
            fs::write(dir.join(format!("msg-{:05}.xml", i)), snapshot(&format!("R{}", i), i)).unwrap();
        }

        let mut config = RunConfig::new(1, "brk", &dir);
        let mut observer = RecordingObserver::default();
        let mut session = db.session().unwrap();
        let report = ScanRun::new(&mut config, &mut session, SnapshotXmlParser, &mut observer)
            .execute()
            .unwrap();

        assert_eq!(report.loaded, 2500);
        assert_eq!(report.batches, vec![1000, 1000, 500]);
        assert!(report.batches.iter().all(|b| *b <= COMMIT_PAGE_SIZE));
        assert_eq!(session.commits(), 3);
        drop(session);

        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 2500);
        assert_eq!(observer.total, Some(2500));
        assert_eq!(observer.progress.last(), Some(&2500));
    }

    #[test]
    fn test_missing_scan_directory_is_fatal() {
        let (db, temp_dir) = setup_test_db();
        let mut config = RunConfig::new(1, "brk", temp_dir.path().join("missing"));
        config.logfile = "earlier run".to_string();
        let mut observer = RecordingObserver::default();

        let err = run(&db, &mut config, &mut observer).unwrap_err();
        assert!(matches!(err, ScannerError::Validation(_)));
        assert_eq!(config.status, ProcessingStatus::Error);
        assert_eq!(config.summary, ERROR_SUMMARY);
        assert!(config.logfile.starts_with("earlier run"));
        assert!(config.logfile.contains("missing"));
        assert_eq!(observer.exceptions.len(), 1);
        assert!(observer.total.is_none());

        let stored = StagingSession::begin(db.open_connection().unwrap())
            .unwrap()
            .load_run_config(1)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ProcessingStatus::Error);
        assert_eq!(stored.summary, ERROR_SUMMARY);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 0);
    }

    #[test]
    fn test_unwritable_archive_degrades_run() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();
        fs::write(dir.join("b.xml"), snapshot("X2", 2)).unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "a file, not a directory").unwrap();

        let mut config = RunConfig::new(1, "brk", &dir).with_archive_directory(blocker.join("archive"));
        let mut observer = RecordingObserver::default();
        let report = run(&db, &mut config, &mut observer).unwrap();

        assert_eq!(config.status, ProcessingStatus::Waiting);
        assert_eq!(observer.exceptions.len(), 1);
        assert!(observer.exceptions[0].contains("no files will be archived"));
        assert!(!report.archiving_enabled);
        assert_eq!(report.loaded, 2);
        assert!(dir.join("a.xml").exists());
        assert!(dir.join("b.xml").exists());
        // the configured directory is kept for later runs
        assert_eq!(config.archive_directory, Some(blocker.join("archive")));
    }

    #[test]
    fn test_archives_every_scanned_file() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        let archive = temp_dir.path().join("archive");

        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();
        let mut config = RunConfig::new(1, "brk", &dir);
        run(&db, &mut config, &mut RecordingObserver::default()).unwrap();

        // a.xml is now a duplicate, b.xml fails to parse; both are archived
        fs::write(dir.join("b.xml"), "<broken").unwrap();
        fs::write(dir.join("notes.txt"), "stays").unwrap();
        let mut config = config.with_archive_directory(&archive);
        let report = run(&db, &mut config, &mut RecordingObserver::default()).unwrap();

        assert!(report.archiving_enabled);
        assert_eq!(report.archived, 2);
        assert_eq!(report.archive_failures, 0);
        assert!(archive.join("a.xml").exists());
        assert!(archive.join("b.xml").exists());
        assert!(!dir.join("a.xml").exists());
        assert!(dir.join("notes.txt").exists());
        assert_eq!(config.summary, "already processed: 1, loaded: 1");
    }

    #[test]
    fn test_archive_disabled_by_option() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();

        let mut config = RunConfig::new(1, "brk", &dir).with_archive_directory(temp_dir.path().join("archive"));
        let options = ScanOptions { archive: false, ..ScanOptions::default() };
        let report = scan_directory(&db, &mut config, SnapshotXmlParser, options, &mut NoopObserver).unwrap();

        assert!(!report.archiving_enabled);
        assert!(dir.join("a.xml").exists());
        assert!(!temp_dir.path().join("archive").exists());
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        fs::write(dir.join("a.xml"), [0xff, 0xfe, 0xfd]).unwrap();
        fs::write(dir.join("b.xml"), snapshot("X2", 2)).unwrap();

        let mut config = RunConfig::new(1, "brk", &dir);
        let mut observer = RecordingObserver::default();
        let report = run(&db, &mut config, &mut observer).unwrap();

        assert_eq!(report.unreadable, 1);
        assert_eq!(report.loaded, 1);
        assert_eq!(observer.exceptions.len(), 1);
        assert!(observer.exceptions[0].contains("a.xml"));
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records WHERE file_name = 'a.xml'"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records WHERE file_name = 'b.xml'"), 1);
        assert!(config.logfile.contains("cannot read"));
        assert_eq!(config.status, ProcessingStatus::Waiting);
    }

    #[test]
    fn test_observer_sees_progress_and_result() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        write_abc(&dir);

        let mut config = RunConfig::new(4, "brk-snapshots", &dir);
        let mut observer = RecordingObserver::default();
        run(&db, &mut config, &mut observer).unwrap();

        assert_eq!(observer.total, Some(2));
        assert_eq!(observer.progress, vec![1, 2]);
        assert!(observer.logs[0].contains("(id 4) started on"));
        assert!(observer.logs.iter().any(|l| l.contains("Files loaded: 2")));
        assert_eq!(observer.statuses.len(), 1);
        assert!(observer.statuses[0].starts_with("Run finished on"));
    }

    #[test]
    fn test_empty_directory_still_commits() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);

        let mut config = RunConfig::new(1, "brk", &dir);
        let report = run(&db, &mut config, &mut RecordingObserver::default()).unwrap();
        assert_eq!(report.batches, vec![0]);
        assert_eq!(config.summary, "already processed: 0, loaded: 0");
        assert_eq!(count(&db, "SELECT COUNT(*) FROM run_configs WHERE status = 'WAITING'"), 1);
    }

    /// Session wrapper whose n-th load record insert fails.
    struct FailingInsertStore<'s> {
        session: &'s mut StagingSession,
        fail_at: usize,
        inserts: usize,
    }

    impl StagingStore for FailingInsertStore<'_> {
        fn load_record_exists(&self, file_name: &str, source_kind: &str) -> Result<bool> {
            self.session.load_record_exists(file_name, source_kind)
        }
        fn insert_load_record(&mut self, record: &crate::model::LoadRecord) -> Result<i64> {
            self.inserts += 1;
            if self.inserts == self.fail_at {
                return Err(ScannerError::Database(rusqlite::Error::InvalidQuery));
            }
            self.session.insert_load_record(record)
        }
        fn insert_message(&mut self, message: &crate::model::MessageRecord) -> Result<i64> {
            self.session.insert_message(message)
        }
        fn save_run_config(&mut self, config: &RunConfig) -> Result<()> {
            self.session.save_run_config(config)
        }
        fn commit(&mut self) -> Result<()> {
            self.session.commit()
        }
        fn rollback(&mut self) -> Result<()> {
            self.session.rollback()
        }
    }

    fn run_failing_at(
        db: &Db,
        config: &mut RunConfig,
        observer: &mut RecordingObserver,
        fail_at: usize,
    ) -> ScannerError {
        let mut session = db.session().unwrap();
        let mut store = FailingInsertStore {
            session: &mut session,
            fail_at,
            inserts: 0,
        };
        ScanRun::new(config, &mut store, SnapshotXmlParser, observer)
            .execute()
            .unwrap_err()
    }

    fn stored_config(db: &Db, id: i64) -> RunConfig {
        StagingSession::begin(db.open_connection().unwrap())
            .unwrap()
            .load_run_config(id)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_store_failure_mid_page_keeps_files_in_scan_directory() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        let archive = temp_dir.path().join("archive");
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();
        fs::write(dir.join("b.xml"), snapshot("X2", 2)).unwrap();

        let mut config = RunConfig::new(1, "brk", &dir).with_archive_directory(&archive);
        let err = run_failing_at(&db, &mut config, &mut RecordingObserver::default(), 2);
        assert!(matches!(err, ScannerError::Database(_)));

        // a.xml was staged but never committed, so it must not be archived
        assert!(dir.join("a.xml").exists());
        assert!(dir.join("b.xml").exists());
        assert!(!archive.join("a.xml").exists());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM messages"), 0);

        let report = run(&db, &mut config, &mut RecordingObserver::default()).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.archived, 2);
        assert!(archive.join("a.xml").exists());
        assert!(archive.join("b.xml").exists());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 2);
        assert_eq!(config.status, ProcessingStatus::Waiting);
    }

    #[test]
    fn test_committed_pages_are_archived_before_a_failure() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        let archive = temp_dir.path().join("archive");
        for i in 0..=COMMIT_PAGE_SIZE {
            fs::write(dir.join(format!("msg-{:05}.xml", i)), snapshot(&format!("R{}", i), i as u32)).unwrap();
        }

        let mut config = RunConfig::new(1, "brk", &dir).with_archive_directory(&archive);
        run_failing_at(&db, &mut config, &mut RecordingObserver::default(), COMMIT_PAGE_SIZE + 1);

        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), COMMIT_PAGE_SIZE as i64);
        assert_eq!(fs::read_dir(&archive).unwrap().count(), COMMIT_PAGE_SIZE);
        let last = format!("msg-{:05}.xml", COMMIT_PAGE_SIZE);
        assert!(dir.join(&last).exists());

        let report = run(&db, &mut config, &mut RecordingObserver::default()).unwrap();
        assert_eq!(report.files_found, 1);
        assert_eq!(report.loaded, 1);
        assert!(archive.join(&last).exists());
    }

    #[test]
    fn test_store_failure_marks_run_as_error() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();

        let mut config = RunConfig::new(1, "brk", &dir);
        config.logfile = "earlier run".to_string();
        let mut observer = RecordingObserver::default();
        run_failing_at(&db, &mut config, &mut observer, 1);

        assert_eq!(config.status, ProcessingStatus::Error);
        assert_eq!(config.summary, ERROR_SUMMARY);
        assert!(config.logfile.starts_with("earlier run"));
        assert!(config.logfile.contains("Database error"));
        assert_eq!(observer.exceptions.len(), 1);

        let stored = stored_config(&db, 1);
        assert_eq!(stored.status, ProcessingStatus::Error);
        assert_eq!(stored.summary, ERROR_SUMMARY);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM load_records"), 0);
    }

    #[test]
    fn test_failed_move_is_counted_and_run_continues() {
        let (db, temp_dir) = setup_test_db();
        let dir = scan_dir(&temp_dir);
        let archive = temp_dir.path().join("archive");
        // a directory in the way of a.xml
        fs::create_dir_all(archive.join("a.xml")).unwrap();
        fs::write(dir.join("a.xml"), snapshot("X1", 1)).unwrap();
        fs::write(dir.join("b.xml"), snapshot("X2", 2)).unwrap();

        let mut config = RunConfig::new(1, "brk", &dir).with_archive_directory(&archive);
        let mut observer = RecordingObserver::default();
        let report = run(&db, &mut config, &mut observer).unwrap();

        assert!(report.archiving_enabled);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.archived, 1);
        assert_eq!(report.archive_failures, 1);
        assert!(dir.join("a.xml").is_file());
        assert!(archive.join("b.xml").is_file());
        assert!(observer.exceptions.is_empty());
        assert!(observer.logs.iter().any(|l| l.contains("could not be moved")));

        assert_eq!(config.status, ProcessingStatus::Waiting);
        assert!(config.logfile.contains("could not be moved"));
        assert!(config.logfile.ends_with("already processed: 0, loaded: 2\n"));
        let stored = stored_config(&db, 1);
        assert!(stored.logfile.contains("could not be moved"));
        assert_eq!(stored.status, ProcessingStatus::Waiting);
    }
}
