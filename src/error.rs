//! Error types for the browser cluster scheduler.
//!
//! Contract violations by callers (queueing after shutdown, querying an
//! unknown job, ...) are reported through [`ClusterError`]. Failures that
//! originate inside a job's execution against a browser are represented
//! separately by [`JobError`] and never cross the supervisor's public API.

use thiserror::Error;

use crate::job::JobId;

/// Errors returned by [`crate::cluster::Cluster`] public operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// The cluster has already been shut down; no further operations are accepted.
    #[error("cluster already shut down")]
    AlreadyShutdown,

    /// The job id is not known to the accounting table.
    #[error("job {0:?} not found")]
    JobNotFound(JobId),

    /// The job's pending counter is already zero; it cannot be queued again
    /// without first spawning a fresh, never-ending-aware id.
    #[error("job {0:?} is already done")]
    AlreadyDone(JobId),

    /// No callback has ever been registered for this job id, and none was
    /// supplied with this call.
    #[error("job {0:?} has no registered callback")]
    MissingCallback(JobId),
}

/// Result alias for [`ClusterError`].
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Opaque failure raised while executing a job against a browser.
///
/// Browser-side failures are isolated inside the worker that produced them:
/// the worker logs the failure, keeps accounting consistent by decrementing
/// pending for the failed instance, and moves on. `JobError` exists so job
/// bodies have a uniform way to report that failure without depending on any
/// particular browser-driver error type.
#[derive(Debug, Clone, Error)]
#[error("job execution failed: {message}")]
pub struct JobError {
    message: String,
}

impl JobError {
    /// Builds a new job error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
