use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Result, ScannerError};

/// Result of moving one scanned file
#[derive(Debug)]
pub enum ArchiveOutcome {
    Moved(PathBuf),
    Failed(io::Error),
}

/// Moves scanned files out of the scan directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    directory: PathBuf,
}

impl Archiver {
    /// Creates the archive directory if needed and checks that both it and the
    /// scan directory accept writes. Any failure disables archiving for the run.
    pub fn prepare(archive_directory: &Path, scan_directory: &Path) -> Result<Self> {
        let unusable = |reason: String| {
            ScannerError::Validation(format!(
                "archive directory '{}' is not a writable directory ({}), no files will be archived",
                archive_directory.display(),
                reason
            ))
        };

        fs::create_dir_all(archive_directory).map_err(|e| unusable(e.to_string()))?;
        if !archive_directory.is_dir() {
            return Err(unusable("not a directory".to_string()));
        }
        probe_writable(archive_directory).map_err(|e| unusable(e.to_string()))?;

        probe_writable(scan_directory).map_err(|e| {
            ScannerError::Validation(format!(
                "scan directory '{}' is not writable ({}), no files will be archived",
                scan_directory.display(),
                e
            ))
        })?;

        Ok(Self {
            directory: archive_directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Move `file` into the archive directory, keeping its name.
    pub fn archive(&self, file: &Path) -> ArchiveOutcome {
        let Some(name) = file.file_name() else {
            return ArchiveOutcome::Failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", file.display()),
            ));
        };
        let target = self.directory.join(name);
        match move_file(file, &target) {
            Ok(()) => ArchiveOutcome::Moved(target),
            Err(e) => ArchiveOutcome::Failed(e),
        }
    }
}

/// Create and remove a uniquely named file in `dir`.
fn probe_writable(dir: &Path) -> io::Result<()> {
    let probe = dir.join(format!(".brkscan-probe-{}", Uuid::new_v4()));
    fs::OpenOptions::new().write(true).create_new(true).open(&probe)?;
    fs::remove_file(&probe)
}

/// Rename, falling back to copy + remove when the rename cannot cross
/// filesystems or is refused. Any other rename error is returned as is.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::CrossesDevices | io::ErrorKind::PermissionDenied
            ) =>
        {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}
