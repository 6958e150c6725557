use std::fmt;

use bulkget_core::Job;
use bytes::Bytes;

/// Object-store level failure. Always scoped to the job that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("NoSuchKey: s3://{bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },
    #[error("AccessDenied: s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },
    #[error("{code}: {message} (status {status})")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error("object too large (max {max_bytes}, actual {actual:?})")]
    TooLarge { max_bytes: u64, actual: Option<u64> },
    #[error("request signing failed: {0}")]
    Signing(String),
}

/// Every failure a run can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connect, write or read failure on the underlying connection.
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed response framing.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A slot stayed empty although no component reported a failure.
    #[error("file {index} ({locator}): no file downloaded")]
    Integrity { index: usize, locator: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Handed to requests that were still pending when their connection went away.
    #[error("connection shut down")]
    ConnectionShutdown,
    #[error("cancelled")]
    Cancelled,
    #[error("task failed: {0}")]
    Task(String),
}

impl FetchError {
    pub(crate) fn transport(context: &str, err: impl fmt::Display) -> Self {
        FetchError::Transport(format!("{context}: {err}"))
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        FetchError::Protocol(message.into())
    }

    /// Job-scoped errors fail one job and leave the connection and the run scope alone.
    pub fn is_job_scoped(&self) -> bool {
        matches!(self, FetchError::Store(_))
    }

    /// Errors that poison the connection they happened on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Protocol(_))
    }
}

/// Outcome of one job, emitted by a worker exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job: Job,
    pub outcome: Result<Bytes, FetchError>,
}

impl JobResult {
    pub fn new(job: Job, outcome: Result<Bytes, FetchError>) -> Self {
        Self { job, outcome }
    }
}
