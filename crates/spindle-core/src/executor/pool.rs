//! Pool internals: work queue, worker loops, shutdown phases.
//!
//! Design:
//! - One mutex guards the queue and the lifecycle phase, so the
//!   rejection check and the enqueue are a single critical section: a submit
//!   racing a shutdown can never strand a job in a drained queue.
//! - `Notify` wakes parked workers; `watch` channels broadcast the phase
//!   change and the terminated flag to anything awaiting them.
//! - Each job runs in its own spawned task, joined by a worker. A panic is
//!   confined to the job; a forced shutdown aborts the join target.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinError;

use crate::domain::TaskId;
use crate::error::SpindleError;
use crate::promise::CancelToken;

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Accepting and running work.
    Running,
    /// Graceful shutdown: rejecting new work, draining the queue.
    Draining,
    /// Forced shutdown: rejecting new work, queue cancelled, in-flight work
    /// aborted.
    Stopped,
}

pub(crate) type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One queued unit of work.
///
/// The future owns the normal completion path (it settles its promise
/// itself); `fail` is the worker's channel for abnormal ends (panic, abort)
/// that the future cannot report on its own.
pub(crate) struct Job {
    pub(crate) id: TaskId,
    pub(crate) fut: BoxedTask,
    pub(crate) token: Arc<CancelToken>,
    pub(crate) fail: Box<dyn FnOnce(SpindleError) + Send>,
}

pub(crate) struct PoolState {
    queue: VecDeque<Job>,
    phase: Phase,
    /// Live worker tasks.
    workers: usize,
    /// Workers currently parked waiting for the queue.
    idle: usize,
}

/// Shared core of one executor's pool.
pub(crate) struct PoolCore {
    pub(crate) name: String,
    state: Mutex<PoolState>,
    work: Notify,
    pub(crate) phase_tx: watch::Sender<Phase>,
    term_tx: watch::Sender<bool>,
    pub(crate) active: AtomicUsize,
    pub(crate) completed: AtomicU64,
    /// Cached pools grow a worker per submit when none is parked.
    grow_on_demand: bool,
    idle_timeout: Duration,
    pub(crate) debug: bool,
}

/// How long a worker lives once the queue goes quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerMode {
    /// Lives until shutdown (fixed, single, and scheduled pools).
    Pinned,
    /// Exits after sitting idle for the pool's idle timeout (cached pools).
    Reclaimable,
}

impl PoolCore {
    pub(crate) fn new(
        name: String,
        debug: bool,
        grow_on_demand: bool,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let (phase_tx, _) = watch::channel(Phase::Running);
        let (term_tx, _) = watch::channel(false);
        Arc::new(Self {
            name,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                phase: Phase::Running,
                workers: 0,
                idle: 0,
            }),
            work: Notify::new(),
            phase_tx,
            term_tx,
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            grow_on_demand,
            idle_timeout,
            debug,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state lock poisoned")
    }

    /// Enqueue a job. Fails once the pool has left `Running`, handing the job
    /// back untouched. The second return value asks the caller to spawn a
    /// worker (cached pools with nobody parked).
    pub(crate) fn enqueue(&self, job: Job) -> Result<(TaskId, bool), Job> {
        let id = job.id;
        let grow = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                return Err(job);
            }
            state.queue.push_back(job);
            self.grow_on_demand && state.idle == 0
        };
        if !grow {
            self.work.notify_one();
        }
        if self.debug {
            tracing::debug!(executor = %self.name, task = %id, "task queued");
        }
        Ok((id, grow))
    }

    /// Graceful shutdown: reject new work, let the queue drain. Idempotent.
    pub(crate) fn shutdown(&self) {
        let changed = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                false
            } else {
                state.phase = Phase::Draining;
                self.maybe_terminated(&state);
                true
            }
        };
        if changed {
            self.phase_tx.send_replace(Phase::Draining);
        }
    }

    /// Forced shutdown: cancel queued jobs (their ids are returned) and have
    /// the workers abort whatever is in flight.
    pub(crate) fn shutdown_now(&self) -> Vec<TaskId> {
        let (drained, changed) = {
            let mut state = self.lock();
            let changed = state.phase != Phase::Stopped;
            state.phase = Phase::Stopped;
            let drained: Vec<Job> = state.queue.drain(..).collect();
            self.maybe_terminated(&state);
            (drained, changed)
        };
        if changed {
            self.phase_tx.send_replace(Phase::Stopped);
        }
        let mut cancelled = Vec::with_capacity(drained.len());
        for job in drained {
            cancelled.push(job.id);
            (job.fail)(SpindleError::Cancelled);
        }
        cancelled
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.lock().phase != Phase::Running
    }

    pub(crate) fn is_terminated(&self) -> bool {
        let state = self.lock();
        state.phase != Phase::Running && state.workers == 0 && state.queue.is_empty()
    }

    /// Wait up to `timeout` for full drain; returns whether termination
    /// completed in time.
    pub(crate) async fn await_termination(&self, timeout: Duration) -> bool {
        let mut rx = self.term_tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|terminated| *terminated)).await,
            Ok(Ok(_))
        )
    }

    /// (queued, live workers, is_shutdown, is_terminated) under one lock.
    pub(crate) fn snapshot(&self) -> (usize, usize, bool, bool) {
        let state = self.lock();
        let is_shutdown = state.phase != Phase::Running;
        (
            state.queue.len(),
            state.workers,
            is_shutdown,
            is_shutdown && state.workers == 0 && state.queue.is_empty(),
        )
    }

    fn maybe_terminated(&self, state: &PoolState) {
        if state.phase != Phase::Running && state.workers == 0 && state.queue.is_empty() {
            self.term_tx.send_replace(true);
        }
    }
}

/// Spawn `n` workers against `core`.
pub(crate) fn spawn_workers(core: &Arc<PoolCore>, n: usize, mode: WorkerMode) {
    {
        let mut state = core.lock();
        state.workers += n;
    }
    for _ in 0..n {
        let core = Arc::clone(core);
        tokio::spawn(worker_loop(core, mode));
    }
}

async fn worker_loop(core: Arc<PoolCore>, mode: WorkerMode) {
    let mut phase_rx = core.phase_tx.subscribe();
    'work: loop {
        let job = {
            let mut state = core.lock();
            match state.phase {
                Phase::Stopped => break 'work,
                Phase::Draining => match state.queue.pop_front() {
                    Some(job) => Some(job),
                    None => break 'work,
                },
                Phase::Running => state.queue.pop_front(),
            }
        };
        if let Some(job) = job {
            run_one(&core, job).await;
            continue;
        }

        // queue empty: park until work arrives, the phase changes, or (for
        // reclaimable workers) the idle timeout expires
        core.lock().idle += 1;
        let woken = match mode {
            WorkerMode::Pinned => {
                tokio::select! {
                    _ = core.work.notified() => true,
                    _ = phase_rx.changed() => true,
                }
            }
            WorkerMode::Reclaimable => {
                tokio::select! {
                    _ = core.work.notified() => true,
                    _ = phase_rx.changed() => true,
                    _ = tokio::time::sleep(core.idle_timeout) => false,
                }
            }
        };
        {
            let mut state = core.lock();
            state.idle -= 1;
            // The emptiness check and the idle decrement share the lock with
            // enqueue, so a submit either finds this worker parked or sees it
            // already gone and spawns a replacement.
            if !woken && state.queue.is_empty() && state.phase == Phase::Running {
                break 'work;
            }
        }
    }

    let mut state = core.lock();
    state.workers -= 1;
    core.maybe_terminated(&state);
}

async fn run_one(core: &Arc<PoolCore>, job: Job) {
    let Job {
        id,
        fut,
        token,
        fail,
    } = job;

    if token.is_settled() {
        // cancelled while queued; never started
        if core.debug {
            tracing::debug!(executor = %core.name, task = %id, "task skipped (cancelled while queued)");
        }
        return;
    }

    core.active.fetch_add(1, Ordering::Relaxed);
    if core.debug {
        tracing::debug!(executor = %core.name, task = %id, "task started");
    }

    let mut phase_rx = core.phase_tx.subscribe();
    let mut handle = tokio::spawn(fut);
    token.set_abort(handle.abort_handle());
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = phase_rx.wait_for(|phase| *phase == Phase::Stopped) => {
            handle.abort();
            handle.await
        }
    };
    token.clear_abort();

    match joined {
        Ok(()) => {
            if core.debug {
                tracing::debug!(executor = %core.name, task = %id, "task finished");
            }
        }
        Err(err) => {
            let reason = if err.is_panic() {
                let message = panic_message(err);
                tracing::error!(executor = %core.name, task = %id, panic = %message, "task panicked");
                SpindleError::Panicked(message)
            } else {
                SpindleError::Cancelled
            };
            fail(reason);
        }
    }

    core.active.fetch_sub(1, Ordering::Relaxed);
    core.completed.fetch_add(1, Ordering::Relaxed);
}

/// Translate an abnormal join into a promise-storable failure.
pub(crate) fn join_failure(err: JoinError) -> SpindleError {
    if err.is_panic() {
        SpindleError::Panicked(panic_message(err))
    } else {
        SpindleError::Cancelled
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "panic payload of unknown type".to_string()
            }
        }
        Err(_) => "task aborted".to_string(),
    }
}
