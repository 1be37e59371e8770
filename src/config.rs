// ABOUTME: Configuration loading and validation for the pagesnap binary.
// ABOUTME: Reads PAGESNAP_* environment variables and rejects unusable values up front.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_KEEP_SNAPSHOTS: i64 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PAGESNAP_KEEP_SNAPSHOTS must be a positive integer, got {0:?}")]
    InvalidKeep(String),

    #[error("PAGESNAP_BUSY_TIMEOUT_MS must be a number of milliseconds, got {0:?}")]
    InvalidTimeout(String),
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PagesnapConfig {
    pub db_path: PathBuf,
    pub keep_snapshots: i64,
    pub busy_timeout: Duration,
}

impl PagesnapConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - PAGESNAP_DB: SQLite database path (default: ~/.pagesnap/pages.db)
    /// - PAGESNAP_KEEP_SNAPSHOTS: snapshots kept per page on cleanup (default: 5)
    /// - PAGESNAP_BUSY_TIMEOUT_MS: wait for a locked database before failing (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("PAGESNAP_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".pagesnap")
                    .join("pages.db")
            });

        let keep_snapshots = match std::env::var("PAGESNAP_KEEP_SNAPSHOTS") {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(keep) if keep > 0 => keep,
                _ => return Err(ConfigError::InvalidKeep(raw)),
            },
            Err(_) => DEFAULT_KEEP_SNAPSHOTS,
        };

        let busy_timeout = match std::env::var("PAGESNAP_BUSY_TIMEOUT_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidTimeout(raw))?,
            Err(_) => Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        };

        Ok(Self {
            db_path,
            keep_snapshots,
            busy_timeout,
        })
    }
}
