//! Registry of named executors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{ExecutorKind, ExecutorStats, PoolConfig, RegistrySpec};
use crate::error::SpindleError;
use crate::executor::{Executor, ScheduledExecutor};

/// Process-wide registry of named worker pools.
///
/// Design:
/// - An explicit service instance, created at startup and passed by
///   reference; not a hidden global. `close` is the matching teardown hook.
/// - The map mutex is the single synchronization point: `create_or_get`
///   holds it across pool construction, so two racing calls for one unseen
///   name converge on a single instance, and a reader can never observe a
///   half-inserted entry.
#[derive(Default)]
pub struct ExecutorRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    by_name: HashMap<String, Arc<Executor>>,
    /// Registration order, for `list_names` and the status report.
    order: Vec<String>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry lock poisoned")
    }

    /// Idempotent get-or-create. A repeat call returns the existing executor
    /// unchanged; `kind` and `config` are ignored for a name already
    /// registered.
    pub fn create_or_get(&self, name: &str, kind: ExecutorKind, config: PoolConfig) -> Arc<Executor> {
        let mut state = self.lock();
        if let Some(existing) = state.by_name.get(name) {
            return Arc::clone(existing);
        }
        let executor = Executor::start(name, kind, config);
        state.by_name.insert(name.to_string(), Arc::clone(&executor));
        state.order.push(name.to_string());
        tracing::debug!(executor = name, kind = %kind, "executor registered");
        executor
    }

    /// As [`create_or_get`](Self::create_or_get) with the scheduled kind;
    /// fails when the name is already taken by a pool of another kind.
    pub fn create_or_get_scheduled(
        &self,
        name: &str,
        config: PoolConfig,
    ) -> Result<ScheduledExecutor, SpindleError> {
        ScheduledExecutor::wrap(self.create_or_get(name, ExecutorKind::Scheduled, config))
    }

    pub fn get(&self, name: &str) -> Result<Arc<Executor>, SpindleError> {
        self.lock()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| SpindleError::ExecutorNotFound(name.to_string()))
    }

    pub fn get_scheduled(&self, name: &str) -> Result<ScheduledExecutor, SpindleError> {
        ScheduledExecutor::wrap(self.get(name)?)
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().by_name.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn list_names(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Remove `name`, forcing a shutdown first when the pool is still live,
    /// so no pool outlives its registry entry. No-op for unknown names.
    pub fn delete(&self, name: &str) {
        let removed = {
            let mut state = self.lock();
            let removed = state.by_name.remove(name);
            if removed.is_some() {
                state.order.retain(|n| n != name);
            }
            removed
        };
        if let Some(executor) = removed {
            if !executor.is_shutdown() {
                let _ = executor.shutdown_now();
            }
            tracing::debug!(executor = name, "executor deleted");
        }
    }

    /// Shut one executor down, keeping its registry entry. No-op for unknown
    /// names.
    pub fn shutdown(&self, name: &str, force: bool) {
        if let Ok(executor) = self.get(name) {
            let _ = if force {
                executor.shutdown_now().map(|_| ())
            } else {
                executor.shutdown()
            };
        }
    }

    /// Shut every executor down. Per-pool failures are collected; one bad
    /// pool never stops the sweep.
    pub fn shutdown_all(&self, force: bool) -> Result<(), SpindleError> {
        let executors = self.executors_in_order();
        let mut failures = Vec::new();
        for executor in executors {
            let result = if force {
                executor.shutdown_now().map(|_| ())
            } else {
                executor.shutdown()
            };
            if let Err(err) = result {
                // 1 つ失敗しても残りの executor の停止は続ける
                failures.push((executor.name().to_string(), err.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SpindleError::ShutdownIncomplete(failures))
        }
    }

    pub fn stats(&self, name: &str) -> Result<ExecutorStats, SpindleError> {
        Ok(self.get(name)?.stats())
    }

    /// Stats for every executor, in registration order.
    pub fn status_report(&self) -> Vec<ExecutorStats> {
        self.executors_in_order()
            .iter()
            .map(|executor| executor.stats())
            .collect()
    }

    /// Build every executor declared in `spec`; idempotent like
    /// [`create_or_get`](Self::create_or_get).
    pub fn apply_spec(&self, spec: &RegistrySpec) {
        for declared in &spec.executors {
            self.create_or_get(&declared.name, declared.kind, declared.config.clone());
        }
    }

    /// Teardown hook: stop every pool and clear the registry.
    pub fn close(&self, force: bool) -> Result<(), SpindleError> {
        let result = self.shutdown_all(force);
        let mut state = self.lock();
        state.by_name.clear();
        state.order.clear();
        result
    }

    fn executors_in_order(&self) -> Vec<Arc<Executor>> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|name| state.by_name.get(name).cloned())
            .collect()
    }
}
