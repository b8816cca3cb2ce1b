use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Failures of a sync attempt. All of them are recoverable: the queue is left
/// intact and a later trigger retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("no active identity")]
    Unauthenticated,
    #[error("network error: {0}")]
    Network(String),
    #[error("remote store rejected the request: {0}")]
    RemoteRejected(String),
    #[error("local persistence failed: {0}")]
    Persistence(String),
    #[error("another sync is in progress")]
    Busy,
}

impl From<InfraError> for SyncError {
    fn from(error: InfraError) -> Self {
        Self::Persistence(error.to_string())
    }
}
