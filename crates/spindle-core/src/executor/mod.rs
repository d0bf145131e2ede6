//! Named worker pools: construction, submission, shutdown, stats.

mod pool;
mod scheduled;

pub use self::scheduled::{RecurringTask, ScheduledExecutor, ScheduledHandle};
pub(crate) use self::pool::join_failure;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::domain::{CACHED_IDLE_TIMEOUT, ExecutorKind, ExecutorStats, PoolConfig, TaskId};
use crate::error::SpindleError;
use crate::promise::{CancelToken, Promise};

use self::pool::{BoxedTask, Job, PoolCore, WorkerMode, spawn_workers};
use self::scheduled::TimerCore;

/// A named, managed worker pool.
///
/// Construction picks the pool shape from [`ExecutorKind`]; the kind is
/// immutable afterwards. Executors are created through the registry and
/// shared as `Arc<Executor>`.
pub struct Executor {
    name: String,
    kind: ExecutorKind,
    config: PoolConfig,
    created_at: DateTime<Utc>,
    core: Arc<PoolCore>,
    /// Present only for the scheduled kind.
    timer: Option<Arc<TimerCore>>,
}

impl Executor {
    /// Build the pool for `kind` and start its workers.
    pub(crate) fn start(name: &str, kind: ExecutorKind, config: PoolConfig) -> Arc<Self> {
        let threads = kind.effective_threads(config.threads);
        let core = PoolCore::new(
            name.to_string(),
            config.debug,
            kind == ExecutorKind::Cached,
            CACHED_IDLE_TIMEOUT,
        );
        if threads > 0 {
            spawn_workers(&core, threads, WorkerMode::Pinned);
        }
        let timer = (kind == ExecutorKind::Scheduled).then(|| TimerCore::start(&core));
        tracing::debug!(executor = name, kind = %kind, threads, "executor started");
        Arc::new(Self {
            name: name.to_string(),
            kind,
            config,
            created_at: Utc::now(),
            core,
            timer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    /// Submit a task. The returned promise is bound to this executor, so
    /// continuations chained onto it run here as well.
    pub fn submit<F, T>(self: &Arc<Self>, task: F) -> Result<Promise<T>, SpindleError>
    where
        F: Future<Output = Result<T, SpindleError>> + Send + 'static,
        T: Send + 'static,
    {
        let promise = Promise::pending(Some(Arc::clone(self)));
        let completer = promise.clone();
        let on_abnormal = promise.clone();
        let job = Job {
            id: TaskId::generate(),
            fut: self.box_task(async move {
                let out = task.await;
                completer.complete(out);
            }),
            token: promise.token(),
            fail: Box::new(move |err| {
                on_abnormal.complete(Err(err));
            }),
        };
        match self.enqueue(job) {
            Ok(_) => Ok(promise),
            Err(_) => Err(SpindleError::Rejected(self.name.clone())),
        }
    }

    /// Fire-and-forget submission: no result handle. Panics are logged by
    /// the worker and otherwise disappear with the task.
    pub fn submit_and_forget<F>(self: &Arc<Self>, task: F) -> Result<(), SpindleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = Job {
            id: TaskId::generate(),
            fut: self.box_task(task),
            token: CancelToken::new(),
            fail: Box::new(|_| {}),
        };
        match self.enqueue(job) {
            Ok(_) => Ok(()),
            Err(_) => Err(SpindleError::Rejected(self.name.clone())),
        }
    }

    /// Dispatch a completed promise's continuation onto this pool. Falls
    /// back to the ambient runtime when the pool no longer accepts work, so
    /// a continuation is never silently lost during a shutdown race.
    pub(crate) fn dispatch(self: &Arc<Self>, f: Box<dyn FnOnce() + Send>) {
        let job = Job {
            id: TaskId::generate(),
            fut: Box::pin(async move { f() }),
            token: CancelToken::new(),
            fail: Box::new(|_| {}),
        };
        if let Err(job) = self.enqueue(job) {
            tracing::debug!(
                executor = %self.name,
                "pool shut down; continuation moved to the ambient runtime"
            );
            tokio::spawn(job.fut);
        }
    }

    fn enqueue(self: &Arc<Self>, job: Job) -> Result<TaskId, Job> {
        let (id, grow) = self.core.enqueue(job)?;
        if grow {
            spawn_workers(&self.core, 1, WorkerMode::Reclaimable);
        }
        Ok(id)
    }

    /// Box a task body, carrying the submitter's span along when the pool
    /// was configured with `load_context`.
    pub(crate) fn box_task(&self, fut: impl Future<Output = ()> + Send + 'static) -> BoxedTask {
        if self.config.load_context {
            Box::pin(fut.instrument(tracing::Span::current()))
        } else {
            Box::pin(fut)
        }
    }

    /// Graceful shutdown: reject new work, let queued work drain.
    pub fn shutdown(&self) -> Result<(), SpindleError> {
        tracing::debug!(executor = %self.name, "graceful shutdown requested");
        self.core.shutdown();
        Ok(())
    }

    /// Forced shutdown: cancel queued work and interrupt in-flight work.
    /// Returns the ids of tasks cancelled while still queued.
    pub fn shutdown_now(&self) -> Result<Vec<TaskId>, SpindleError> {
        tracing::debug!(executor = %self.name, "forced shutdown requested");
        Ok(self.core.shutdown_now())
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    pub fn is_terminated(&self) -> bool {
        self.core.is_terminated()
    }

    /// Block the caller up to `timeout` waiting for full drain; returns
    /// whether termination completed in time.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        self.core.await_termination(timeout).await
    }

    /// Point-in-time stats.
    pub fn stats(&self) -> ExecutorStats {
        let (queued, workers, is_shutdown, is_terminated) = self.core.snapshot();
        let threads = match self.kind {
            ExecutorKind::Cached => workers,
            _ => self.kind.effective_threads(self.config.threads),
        };
        ExecutorStats {
            name: self.name.clone(),
            kind: self.kind,
            threads,
            queued,
            active: self.core.active.load(Ordering::Relaxed),
            completed: self.core.completed.load(Ordering::Relaxed),
            is_shutdown,
            is_terminated,
            created_at: self.created_at,
        }
    }

    pub(crate) fn timer(&self) -> Option<&Arc<TimerCore>> {
        self.timer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fixed(name: &str, threads: usize) -> Arc<Executor> {
        Executor::start(name, ExecutorKind::Fixed, PoolConfig::with_threads(threads))
    }

    fn single(name: &str) -> Arc<Executor> {
        Executor::start(name, ExecutorKind::Single, PoolConfig::default())
    }

    #[tokio::test]
    async fn submit_returns_the_task_value() {
        let executor = fixed("submit", 2);
        let promise = executor.submit(async { Ok(11) }).unwrap();
        assert_eq!(promise.get().await, Ok(11));
    }

    #[tokio::test]
    async fn task_failure_lands_on_the_promise() {
        let executor = fixed("fail", 2);
        let promise: Promise<u32> = executor
            .submit(async { Err(SpindleError::task("nope")) })
            .unwrap();
        assert_eq!(promise.get().await, Err(SpindleError::task("nope")));
    }

    #[tokio::test(start_paused = true)]
    async fn single_pool_preserves_submission_order() {
        let executor = single("fifo");
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut promises = Vec::new();
        for (index, delay_ms) in [(1, 50u64), (2, 10), (3, 0)] {
            let order = Arc::clone(&order);
            let promise = executor
                .submit(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    order.lock().unwrap().push(index);
                    Ok(index)
                })
                .unwrap();
            promises.push(promise);
        }
        for promise in &promises {
            promise.get().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fixed_pool_runs_tasks_in_parallel() {
        let executor = fixed("parallel", 2);
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut promises = Vec::new();
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            // both tasks must be in flight at once for the barrier to open
            let promise = executor
                .submit(async move {
                    barrier.wait().await;
                    Ok(())
                })
                .unwrap();
            promises.push(promise);
        }
        for promise in promises {
            promise
                .get_timeout(Duration::from_secs(5))
                .await
                .expect("tasks should rendezvous on two workers");
        }
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected_every_time() {
        let executor = fixed("rejected", 1);
        executor.shutdown().unwrap();
        for _ in 0..3 {
            let result = executor.submit(async { Ok(()) });
            assert!(matches!(result, Err(SpindleError::Rejected(ref name)) if name == "rejected"));
        }
        assert!(executor.submit_and_forget(async {}).is_err());
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_queued_work() {
        let executor = single("drain");
        let counter = Arc::new(AtomicU32::new(0));
        let mut promises = Vec::new();
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            promises.push(
                executor
                    .submit(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap(),
            );
        }
        executor.shutdown().unwrap();
        for promise in promises {
            promise.get().await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(executor.await_termination(Duration::from_secs(5)).await);
        assert!(executor.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_shutdown_cancels_queued_and_running_work() {
        let executor = single("force");
        let blocker = executor
            .submit(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .unwrap();
        let mut queued = Vec::new();
        for _ in 0..3 {
            queued.push(executor.submit(async { Ok(()) }).unwrap());
        }
        // let the blocker reach its sleep before forcing shutdown
        tokio::time::sleep(Duration::from_millis(1)).await;

        let cancelled = executor.shutdown_now().unwrap();
        assert_eq!(cancelled.len(), 3);
        assert_eq!(blocker.get().await, Err(SpindleError::Cancelled));
        for promise in queued {
            assert_eq!(promise.get().await, Err(SpindleError::Cancelled));
        }
        assert!(executor.await_termination(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_task() {
        let executor = fixed("panicky", 1);
        let exploded: Promise<u32> = executor.submit(async { panic!("kaboom") }).unwrap();
        match exploded.get().await {
            Err(SpindleError::Panicked(message)) => assert!(message.contains("kaboom")),
            other => panic!("expected panic capture, got {other:?}"),
        }
        // the worker survives and keeps serving
        let after = executor.submit(async { Ok(1) }).unwrap();
        assert_eq!(after.get().await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_queued_task_never_starts() {
        let executor = single("queued-cancel");
        let _blocker = executor
            .submit(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .unwrap();
        let ran = Arc::new(AtomicU32::new(0));
        let queued = {
            let ran = Arc::clone(&ran);
            executor
                .submit(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap()
        };
        assert!(queued.cancel(false));
        assert_eq!(queued.get().await, Err(SpindleError::Cancelled));
        // drain the pool and confirm the cancelled body never ran
        executor.shutdown().unwrap();
        assert!(executor.await_termination(Duration::from_secs(5)).await);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_pool_grows_and_reclaims_idle_workers() {
        let executor = Executor::start("burst", ExecutorKind::Cached, PoolConfig::default());
        let promise = executor.submit(async { Ok(1) }).unwrap();
        assert_eq!(promise.get().await, Ok(1));
        assert!(executor.stats().threads >= 1);

        // beyond the idle timeout the worker is reclaimed
        tokio::time::sleep(CACHED_IDLE_TIMEOUT + Duration::from_secs(1)).await;
        for _ in 0..20 {
            if executor.stats().threads == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(executor.stats().threads, 0);

        // and the pool grows again on demand
        let again = executor.submit(async { Ok(2) }).unwrap();
        assert_eq!(again.get().await, Ok(2));
    }

    #[tokio::test]
    async fn stats_report_queue_and_completion_counts() {
        let executor = fixed("stats", 2);
        let stats = executor.stats();
        assert_eq!(stats.name, "stats");
        assert_eq!(stats.kind, ExecutorKind::Fixed);
        assert_eq!(stats.threads, 2);
        assert_eq!(stats.queued, 0);
        assert!(!stats.is_shutdown);
        assert!(!stats.is_terminated);

        executor.submit(async { Ok(()) }).unwrap().get().await.unwrap();
        for _ in 0..50 {
            if executor.stats().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executor.stats().completed, 1);
    }

    #[tokio::test]
    async fn submit_and_forget_runs_the_task() {
        let executor = fixed("forget", 1);
        let counter = Arc::new(AtomicU32::new(0));
        {
            let counter = Arc::clone(&counter);
            executor
                .submit_and_forget(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        executor.shutdown().unwrap();
        assert!(executor.await_termination(Duration::from_secs(5)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_context_submission_still_completes() {
        let executor = Executor::start(
            "ctx",
            ExecutorKind::Fixed,
            PoolConfig {
                threads: 1,
                load_context: true,
                ..PoolConfig::default()
            },
        );
        let span = tracing::info_span!("request", id = 7);
        let _guard = span.enter();
        let promise = executor.submit(async { Ok("done") }).unwrap();
        assert_eq!(promise.get().await, Ok("done"));
    }
}
