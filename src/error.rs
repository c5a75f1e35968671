use thiserror::Error;

/// Main error type for brkscan
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scan or archive directory failed pre-flight validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// No run configuration with this id
    #[error("Run configuration not found: {0}")]
    RunNotFound(i64),
}

/// Convenient Result type using ScannerError
pub type Result<T> = std::result::Result<T, ScannerError>;
