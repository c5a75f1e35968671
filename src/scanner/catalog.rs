use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Result, ScannerError};

/// A candidate message file in the scan directory
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub file_name: String,
}

/// Check that `dir` exists, is a directory and can be listed.
pub fn validate_scan_directory(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(ScannerError::Validation(format!(
            "scan directory '{}' is not an existing directory",
            dir.display()
        )));
    }
    fs::read_dir(dir).map_err(|e| {
        ScannerError::Validation(format!(
            "scan directory '{}' cannot be listed: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(())
}

/// List the files directly inside `dir` whose name ends in `.<extension>`
/// (case-insensitive), sorted by file name.
///
/// Subdirectories are skipped, never descended into.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<CatalogEntry>> {
    validate_scan_directory(dir)?;

    let suffix = format!(".{}", extension.to_lowercase());
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        if !file_name.to_lowercase().ends_with(&suffix) {
            continue;
        }

        files.push(CatalogEntry {
            path: path.to_path_buf(),
            file_name,
        });
    }

    log::info!("Found {} {} file(s) in {}", files.len(), extension, dir.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_files_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("c.xml"), "<c/>").unwrap();
        fs::write(root.join("A.XML"), "<a/>").unwrap();
        fs::write(root.join("b.Xml"), "<b/>").unwrap();
        fs::write(root.join("notes.txt"), "skip").unwrap();
        fs::write(root.join("xml"), "no extension").unwrap();
        fs::create_dir(root.join("nested.xml")).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/deep.xml"), "<d/>").unwrap();

        let files = list_files(root, "xml").unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["A.XML", "b.Xml", "c.xml"]);
        assert!(files.iter().all(|f| f.path.starts_with(root)));
    }

    #[test]
    fn test_list_files_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["m.xml", "a.xml", "z.xml", "k.xml"] {
            fs::write(temp_dir.path().join(name), "<x/>").unwrap();
        }
        let first: Vec<_> = list_files(temp_dir.path(), "xml").unwrap()
            .into_iter().map(|f| f.file_name).collect();
        let second: Vec<_> = list_files(temp_dir.path(), "xml").unwrap()
            .into_iter().map(|f| f.file_name).collect();
        assert_eq!(first, vec!["a.xml", "k.xml", "m.xml", "z.xml"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_list_files_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_files(temp_dir.path(), "xml").unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_validation_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let err = list_files(&missing, "xml").unwrap_err();
        assert!(matches!(err, ScannerError::Validation(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_file_is_not_a_scan_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.xml");
        fs::write(&file, "<x/>").unwrap();
        assert!(matches!(
            validate_scan_directory(&file),
            Err(ScannerError::Validation(_))
        ));
    }
}
