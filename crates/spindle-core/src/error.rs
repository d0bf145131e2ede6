use thiserror::Error;

/// Error surface for the registry, the pools, and the promise type.
///
/// Design:
/// - Registry misuse (unknown kind, unknown name) fails synchronously at the
///   call site.
/// - Task-body failures are captured on the owning `Promise` and stay inert
///   until observed.
/// - `Clone`, so one stored failure can be handed to any number of observers
///   (continuations, composed promises, repeated `get` calls).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpindleError {
    #[error("unknown executor type '{0}' (expected fixed|single|cached|scheduled)")]
    InvalidExecutorType(String),

    #[error("executor not found: {0}")]
    ExecutorNotFound(String),

    #[error("executor '{0}' is not a scheduled executor")]
    NotScheduled(String),

    #[error("executor '{0}' rejected the task: already shut down")]
    Rejected(String),

    #[error("cancelled before completion")]
    Cancelled,

    #[error("timed out waiting for completion")]
    Timeout,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task failed: {0}")]
    Task(String),

    /// Bulk shutdown: per-executor failures, collected so one bad pool does
    /// not stop the sweep. Pairs of (executor name, failure message).
    #[error("shutdown failed for {} executor(s)", .0.len())]
    ShutdownIncomplete(Vec<(String, String)>),
}

impl SpindleError {
    /// Capture an arbitrary task-body failure.
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }
}
