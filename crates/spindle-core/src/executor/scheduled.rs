//! Delayed and periodic submission on top of a pool.
//!
//! Design:
//! - A scheduled pool owns one timer task beside its workers. Due entries
//!   are moved from a min-heap onto the ordinary work queue, so execution,
//!   cancellation, and shutdown all follow the pool's normal rules.
//! - Periodic series re-arm themselves from the job body after each run
//!   completes, which is what serializes overlapping runs: the next firing
//!   cannot exist before the previous one has returned.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{ExecutorKind, TaskId};
use crate::error::SpindleError;
use crate::promise::{CancelToken, Promise};

use super::Executor;
use super::pool::{Job, Phase, PoolCore};

/// A unit of work re-invoked on a schedule.
#[async_trait]
pub trait RecurringTask: Send + Sync {
    async fn run(&self) -> Result<(), SpindleError>;
}

/// Repeat policy for a periodic series.
#[derive(Debug, Clone, Copy)]
enum Repeat {
    /// Next run measured from the start of the previous one. An overlong run
    /// pushes the next firing to start immediately after it.
    FixedRate(Duration),
    /// Next run measured from the completion of the previous one.
    FixedDelay(Duration),
}

struct PeriodicWork {
    id: TaskId,
    task: Arc<dyn RecurringTask>,
    token: Arc<CancelToken>,
    repeat: Repeat,
}

enum TimerWork {
    Once(Job),
    Periodic(PeriodicWork),
}

/// Heap entry; ordering is reversed so the earliest deadline pops first,
/// with the sequence number breaking ties in push order.
struct TimerEntry {
    at: Instant,
    seq: u64,
    work: TimerWork,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    /// Set under the lock when the timer loop exits; later pushes fail.
    stopped: bool,
}

/// Timer side of a scheduled pool.
pub(crate) struct TimerCore {
    state: Mutex<TimerState>,
    alarm: Notify,
}

impl TimerCore {
    pub(crate) fn start(core: &Arc<PoolCore>) -> Arc<Self> {
        let timer = Arc::new(Self {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                stopped: false,
            }),
            alarm: Notify::new(),
        });
        tokio::spawn(timer_loop(Arc::clone(core), Arc::clone(&timer)));
        timer
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().expect("timer state lock poisoned")
    }

    fn push(&self, at: Instant, work: TimerWork) -> Result<(), TimerWork> {
        {
            let mut state = self.lock();
            if state.stopped {
                return Err(work);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(TimerEntry { at, seq, work });
        }
        self.alarm.notify_one();
        Ok(())
    }
}

async fn timer_loop(core: Arc<PoolCore>, timer: Arc<TimerCore>) {
    let mut phase_rx = core.phase_tx.subscribe();
    loop {
        if *phase_rx.borrow() != Phase::Running {
            break;
        }
        let next_at = {
            let mut state = timer.lock();
            let now = Instant::now();
            while state.heap.peek().is_some_and(|entry| entry.at <= now) {
                let Some(entry) = state.heap.pop() else { break };
                dispatch_due(&core, &timer, entry.work);
            }
            state.heap.peek().map(|entry| entry.at)
        };
        tokio::select! {
            _ = timer.alarm.notified() => {}
            _ = phase_rx.changed() => {}
            _ = sleep_until_opt(next_at) => {}
        }
    }

    // Pool is shutting down: nothing scheduled from here on may fire. Pending
    // one-shot entries settle as cancelled; periodic series simply end.
    let leftovers: Vec<TimerEntry> = {
        let mut state = timer.lock();
        state.stopped = true;
        state.heap.drain().collect()
    };
    for entry in leftovers {
        if let TimerWork::Once(job) = entry.work {
            (job.fail)(SpindleError::Cancelled);
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn dispatch_due(core: &Arc<PoolCore>, timer: &Arc<TimerCore>, work: TimerWork) {
    match work {
        TimerWork::Once(job) => {
            if let Err(job) = core.enqueue(job) {
                (job.fail)(SpindleError::Cancelled);
            }
        }
        TimerWork::Periodic(periodic) => {
            if periodic.token.is_settled() {
                // handle was cancelled while the entry waited
                return;
            }
            let job = periodic_job(core, timer, periodic);
            // a rejected enqueue means the pool is stopping; the series ends
            let _ = core.enqueue(job);
        }
    }
}

/// Build the job for one firing of a periodic series. Re-arming happens at
/// the end of the body, after the user task has returned.
fn periodic_job(core: &Arc<PoolCore>, timer: &Arc<TimerCore>, work: PeriodicWork) -> Job {
    let core = Arc::clone(core);
    let timer = Arc::clone(timer);
    let token = Arc::clone(&work.token);
    let id = work.id;
    let fut = async move {
        let started = Instant::now();
        if let Err(err) = work.task.run().await {
            tracing::warn!(executor = %core.name, task = %id, error = %err, "recurring task failed");
        }
        if work.token.is_settled() {
            return;
        }
        let next_at = match work.repeat {
            Repeat::FixedRate(period) => {
                let target = started + period;
                let now = Instant::now();
                if target < now { now } else { target }
            }
            Repeat::FixedDelay(delay) => Instant::now() + delay,
        };
        let _ = timer.push(next_at, TimerWork::Periodic(work));
    };
    Job {
        id,
        fut: Box::pin(fut),
        token,
        fail: Box::new(|_| {}),
    }
}

/// Control handle for a periodic series.
pub struct ScheduledHandle {
    id: TaskId,
    token: Arc<CancelToken>,
}

impl ScheduledHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Stop future firings. A firing already in progress finishes unless
    /// `may_interrupt`, in which case it is aborted at its next await point.
    /// Returns false when the series was already cancelled.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let first = self.token.settle();
        if first && may_interrupt {
            self.token.abort_running();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_settled()
    }
}

/// Typed view over an executor of scheduled kind.
///
/// Obtained through the registry; construction checks the kind, so the
/// delay and period surface cannot be reached on a plain pool.
#[derive(Clone)]
pub struct ScheduledExecutor {
    inner: Arc<Executor>,
}

impl ScheduledExecutor {
    pub(crate) fn wrap(inner: Arc<Executor>) -> Result<Self, SpindleError> {
        if inner.kind() == ExecutorKind::Scheduled {
            Ok(Self { inner })
        } else {
            Err(SpindleError::NotScheduled(inner.name().to_string()))
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.inner
    }

    /// Immediate submission, as on any other pool.
    pub fn submit<F, T>(&self, task: F) -> Result<Promise<T>, SpindleError>
    where
        F: Future<Output = Result<T, SpindleError>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.submit(task)
    }

    /// Run `task` once, `delay` from now.
    pub fn schedule<F, T>(&self, task: F, delay: Duration) -> Result<Promise<T>, SpindleError>
    where
        F: Future<Output = Result<T, SpindleError>> + Send + 'static,
        T: Send + 'static,
    {
        let timer = self.timer_or_reject()?;
        let promise = Promise::pending(Some(Arc::clone(&self.inner)));
        let completer = promise.clone();
        let on_abnormal = promise.clone();
        let job = Job {
            id: TaskId::generate(),
            fut: self.inner.box_task(async move {
                let out = task.await;
                completer.complete(out);
            }),
            token: promise.token(),
            fail: Box::new(move |err| {
                on_abnormal.complete(Err(err));
            }),
        };
        match timer.push(Instant::now() + delay, TimerWork::Once(job)) {
            Ok(()) => Ok(promise),
            Err(_) => Err(SpindleError::Rejected(self.inner.name().to_string())),
        }
    }

    /// Re-invoke `task` every `period`, measured from the start of each run.
    pub fn schedule_at_fixed_rate(
        &self,
        task: Arc<dyn RecurringTask>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle, SpindleError> {
        self.schedule_periodic(task, initial_delay, Repeat::FixedRate(period))
    }

    /// Re-invoke `task`, waiting `delay` after each run's completion.
    pub fn schedule_with_fixed_delay(
        &self,
        task: Arc<dyn RecurringTask>,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle, SpindleError> {
        self.schedule_periodic(task, initial_delay, Repeat::FixedDelay(delay))
    }

    fn schedule_periodic(
        &self,
        task: Arc<dyn RecurringTask>,
        initial_delay: Duration,
        repeat: Repeat,
    ) -> Result<ScheduledHandle, SpindleError> {
        let timer = self.timer_or_reject()?;
        let id = TaskId::generate();
        let token = CancelToken::new();
        let work = PeriodicWork {
            id,
            task,
            token: Arc::clone(&token),
            repeat,
        };
        match timer.push(Instant::now() + initial_delay, TimerWork::Periodic(work)) {
            Ok(()) => Ok(ScheduledHandle { id, token }),
            Err(_) => Err(SpindleError::Rejected(self.inner.name().to_string())),
        }
    }

    fn timer_or_reject(&self) -> Result<&Arc<TimerCore>, SpindleError> {
        if self.inner.is_shutdown() {
            return Err(SpindleError::Rejected(self.inner.name().to_string()));
        }
        self.inner
            .timer()
            .ok_or_else(|| SpindleError::NotScheduled(self.inner.name().to_string()))
    }
}

impl Deref for ScheduledExecutor {
    type Target = Executor;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
