//! Status views over executors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExecutorKind;

/// Point-in-time stats for one executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub name: String,
    pub kind: ExecutorKind,

    /// Configured parallelism; for cached pools, the current live worker
    /// count.
    pub threads: usize,

    /// Tasks waiting in the queue.
    pub queued: usize,

    /// Workers currently running a task.
    pub active: usize,

    /// Tasks run to an end (normally or not) since the pool started.
    pub completed: u64,

    pub is_shutdown: bool,
    pub is_terminated: bool,

    pub created_at: DateTime<Utc>,
}
