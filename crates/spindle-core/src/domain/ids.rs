//! Strongly-typed task identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier assigned to every unit of work a pool accepts.
///
/// ULID-backed: unique across pools without coordination, and sortable by
/// submission time, which keeps log output and cancelled-task lists readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
