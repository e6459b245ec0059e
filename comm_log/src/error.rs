use rusqlite::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by communication log operations.
///
/// Every operation either applies completely or not at all, so a caller that
/// receives an error can assume the log is unchanged.
#[derive(Debug, Error)]
pub enum LogError {
    /// Append input was malformed (unknown kind, empty or oversized message).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("event {0} not found")]
    EventNotFound(Uuid),

    #[error("communication log for project {0} not found")]
    LogNotFound(Uuid),

    /// The backing store reported a serialization conflict. Retry the operation.
    #[error("concurrent update conflict")]
    Concurrency,

    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl LogError {
    pub fn validation(reason: impl Into<String>) -> Self {
        LogError::Validation(reason.into())
    }

    /// True for both a missing event and a missing project log.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LogError::EventNotFound(_) | LogError::LogNotFound(_))
    }
}

impl From<rusqlite::Error> for LogError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => LogError::Concurrency,
            _ => LogError::Storage(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
