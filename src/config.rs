use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub staging: StagingConfig,
}

/// One configured scanner instance
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Id of the run configuration row this scanner reads and updates.
    pub id: i64,
    pub name: String,
    /// Directory polled for incoming snapshot messages (not recursed).
    pub scan_directory: PathBuf,
    /// Scanned files are moved here when set.
    #[serde(default)]
    pub archive_directory: Option<PathBuf>,
    #[serde(default = "default_source_kind")]
    pub source_kind: String,
    /// File extension to pick up, without the leading dot, matched case-insensitively.
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Staging database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_source_kind() -> String {
    crate::scanner::SOURCE_KIND_BRK.to_string()
}

fn default_extension() -> String {
    "xml".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in BRKSCAN_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("BRKSCAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_file(&config_path)
    }

    /// Load and validate configuration from an explicit path
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Directory checks are deliberately left to the scan run, which records
    /// an ERROR state on the run configuration instead of refusing to start.
    fn validate(&self) -> Result<()> {
        if self.scanner.name.trim().is_empty() {
            anyhow::bail!("scanner.name must not be empty");
        }

        if self.scanner.source_kind.trim().is_empty() {
            anyhow::bail!("scanner.source_kind must not be empty");
        }

        if self.scanner.extension.trim().is_empty() {
            anyhow::bail!("scanner.extension must not be empty");
        }

        if self.scanner.extension.starts_with('.') {
            anyhow::bail!(
                "scanner.extension must be given without the leading dot, e.g. \"xml\" (got \"{}\")",
                self.scanner.extension
            );
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.staging.db_path
    }

    /// Get the scan directory
    pub fn scan_directory(&self) -> &Path {
        &self.scanner.scan_directory
    }
}
