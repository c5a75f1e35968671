use std::path::Path;

use super::StagingStore;
use crate::error::Result;

/// Logical name of a message file: its base name, independent of where it was found.
pub fn file_name_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// True if a load record for this file name and source kind already exists,
/// whatever its outcome was.
///
/// Must be called before the file is read, so duplicates never cost a parse.
pub fn is_duplicate<S: StagingStore + ?Sized>(
    store: &S,
    path: &Path,
    source_kind: &str,
) -> Result<bool> {
    let file_name = file_name_for(path);
    let duplicate = store.load_record_exists(&file_name, source_kind)?;
    if duplicate {
        log::debug!("{} ({}) was loaded in an earlier run", file_name, source_kind);
    }
    Ok(duplicate)
}
