// ABOUTME: Storage-level error type shared by every store operation.
// ABOUTME: Lock contention is surfaced separately so callers can retry the page-scoped unit.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while talking to the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("storage timeout: {0}")]
    Timeout(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Only lock timeouts are transient; everything else needs a human.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Timeout(err.to_string())
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_retryable_timeout() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err = StoreError::from(busy);

        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn other_failures_are_not_retryable() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert!(!err.is_retryable());
    }
}
