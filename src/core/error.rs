//! Error types for engine operations.

use thiserror::Error;

use crate::util::serde::TaskKey;

/// Errors produced by stream and scheduler components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Capacity or quota was insufficient for the requested cost. Not fatal;
    /// the caller retries or waits on the pool's signal.
    #[error("acquisition rejected by pool `{pool}`: {reason}")]
    AcquisitionRejected {
        /// Pool that rejected the acquisition.
        pool: String,
        /// Why the acquisition could not be satisfied.
        reason: String,
    },
    /// A task runner failed. Reported via an error envelope or propagated,
    /// depending on the runner's `continue_on_error` setting.
    #[error("task `{key}` failed: {reason}")]
    TaskFailed {
        /// Key of the failed task.
        key: TaskKey,
        /// Failure description from the task runner.
        reason: String,
    },
    /// A bounded-wait deadline passed before the upstream settled.
    #[error("timeout exceeded after {waited_ms}ms")]
    TimeoutExceeded {
        /// How long the stage waited before giving up, in milliseconds.
        waited_ms: u64,
    },
    /// The upstream or producer signaled end-of-stream. A terminal state,
    /// not a failure.
    #[error("stream closed")]
    StreamClosed,
    /// Configuration was rejected during validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
