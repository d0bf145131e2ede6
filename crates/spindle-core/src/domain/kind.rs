//! Executor kinds: pool-shape selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpindleError;

/// Pool shape, fixed at construction.
///
/// The kind decides parallelism and queueing:
/// - `fixed`: exactly N workers, unbounded FIFO queue
/// - `single`: one worker, strict submission-order execution
/// - `cached`: workers spawned on demand, reclaimed after an idle timeout
/// - `scheduled`: fixed workers plus delayed and periodic submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Fixed,
    Single,
    Cached,
    Scheduled,
}

impl ExecutorKind {
    /// Parse a kind tag. Unknown tags are rejected here, at the boundary.
    pub fn parse(tag: &str) -> Result<Self, SpindleError> {
        match tag {
            "fixed" => Ok(Self::Fixed),
            "single" => Ok(Self::Single),
            "cached" => Ok(Self::Cached),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(SpindleError::InvalidExecutorType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Single => "single",
            Self::Cached => "cached",
            Self::Scheduled => "scheduled",
        }
    }

    /// Worker count for this kind given the requested parallelism.
    ///
    /// `single` always runs one worker; `cached` starts empty and grows on
    /// demand.
    pub(crate) fn effective_threads(&self, requested: usize) -> usize {
        match self {
            Self::Single => 1,
            Self::Cached => 0,
            Self::Fixed | Self::Scheduled => requested.max(1),
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = SpindleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
