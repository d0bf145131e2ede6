//! spindle-core
//!
//! Named worker pools with a composable, single-assignment promise type.
//!
//! # Modules
//! - **domain**: ids, executor kinds, configuration, status views
//! - **error**: the crate-wide error type
//! - **executor**: pool construction, submission, shutdown, scheduling
//! - **promise**: `Promise<T>` and its composition operators
//! - **registry**: named-executor registry and bulk lifecycle
//!
//! Callers obtain pools from an [`ExecutorRegistry`], submit futures against
//! them, and compose the resulting [`Promise`] handles. Blocking is confined
//! to `get`, `get_timeout`, and `await_termination`; everything else enqueues
//! and returns immediately.

pub mod domain;
pub mod error;
pub mod executor;
pub mod promise;
pub mod registry;

pub use self::domain::{ExecutorKind, ExecutorSpec, ExecutorStats, PoolConfig, RegistrySpec, TaskId};
pub use self::error::SpindleError;
pub use self::executor::{Executor, RecurringTask, ScheduledExecutor, ScheduledHandle};
pub use self::promise::{Promise, PromiseState};
pub use self::registry::ExecutorRegistry;
