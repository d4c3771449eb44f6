use thiserror::Error;

use crate::job::JobId;

/// Errors raised while parsing a value read back from the store.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0} is not a valid JobStatus")]
    InvalidJobStatus(String),
}

/// Enumeration of errors for operations against the `PgQueueStore`.
///
/// Errors are grouped by behavior rather than by originating query, per the
/// error taxonomy: serialization errors and storage errors always propagate to
/// the caller, while `NotFound` groups "row missing", "attempts exhausted on
/// retry", and "job already terminal on cancel" into a single precondition-
/// failure class a worker can react to uniformly.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection to the backend failed: {error}")]
    Connection { error: sqlx::Error },
    #[error("{command} query failed: {error}")]
    Query { command: String, error: sqlx::Error },
    #[error("payload could not be serialized: {error}")]
    Serialization { error: serde_json::Error },
    #[error("no job matching the given precondition: {0}")]
    NotFound(JobId),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A human-readable error returned by a job handler.
///
/// Any non-nil handler return is wrapped as this type; whether it is
/// retryable depends only on the job's remaining attempts, never on the
/// content of the error itself.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
