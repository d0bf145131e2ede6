//! Pool and registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ExecutorKind;

/// Requested parallelism when none is given.
pub const DEFAULT_THREADS: usize = 20;

/// Idle time after which a cached pool reclaims a worker.
pub const CACHED_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-executor options.
///
/// `threads` is ignored for `cached` pools and forced to 1 for `single`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub threads: usize,

    /// Emit per-task lifecycle diagnostics (queued, started, finished,
    /// skipped) at debug level.
    pub debug: bool,

    /// Capture the submitter's tracing span and enter it around the task
    /// body on the worker, so request-scoped fields follow the work.
    pub load_context: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            debug: false,
            load_context: false,
        }
    }
}

impl PoolConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }
}

/// One executor declared in a registry spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub name: String,
    pub kind: ExecutorKind,
    #[serde(flatten)]
    pub config: PoolConfig,
}

/// Declarative registry bootstrap: the full set of pools an application
/// wants available at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySpec {
    #[serde(default)]
    pub executors: Vec<ExecutorSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.threads, DEFAULT_THREADS);
        assert!(!config.debug);
        assert!(!config.load_context);
    }

    #[test]
    fn registry_spec_fills_missing_fields() {
        let spec: RegistrySpec = serde_json::from_str(
            r#"{"executors":[{"name":"io","kind":"fixed","threads":4},
                             {"name":"beat","kind":"scheduled","debug":true}]}"#,
        )
        .unwrap();
        assert_eq!(spec.executors.len(), 2);
        assert_eq!(spec.executors[0].config.threads, 4);
        assert!(!spec.executors[0].config.debug);
        assert_eq!(spec.executors[1].kind, ExecutorKind::Scheduled);
        assert!(spec.executors[1].config.debug);
        assert_eq!(spec.executors[1].config.threads, DEFAULT_THREADS);
    }
}
