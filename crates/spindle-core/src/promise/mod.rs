//! Single-assignment asynchronous result container.

mod combine;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::SpindleError;
use crate::executor::Executor;

/// Observable lifecycle of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Cancellation state shared between a promise (or scheduled handle) and the
/// worker running its task.
///
/// Design:
/// - `settled` mirrors the terminal transition, so a queued job can be
///   skipped without knowing the result type behind it.
/// - `abort` is registered only while the task is actually running; a cancel
///   with interrupt stops it at its next await point.
pub(crate) struct CancelToken {
    settled: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl CancelToken {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            settled: AtomicBool::new(false),
            abort: Mutex::new(None),
        })
    }

    /// Mark terminal. Returns whether this call made the transition.
    pub(crate) fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub(crate) fn set_abort(&self, handle: AbortHandle) {
        *self.lock_abort() = Some(handle);
    }

    pub(crate) fn clear_abort(&self) {
        self.lock_abort().take();
    }

    pub(crate) fn abort_running(&self) {
        if let Some(handle) = self.lock_abort().take() {
            handle.abort();
        }
    }

    fn lock_abort(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.abort.lock().expect("abort slot lock poisoned")
    }
}

type Outcome<T> = Arc<Result<T, SpindleError>>;
type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum Cell<T> {
    Pending(Vec<Continuation<T>>),
    Done(Outcome<T>),
}

struct Inner<T> {
    cell: Mutex<Cell<T>>,
    done_tx: watch::Sender<bool>,
    token: Arc<CancelToken>,
    /// Non-owning association: continuations are dispatched onto this pool,
    /// but the promise never manages the pool's lifecycle.
    executor: Option<Arc<Executor>>,
}

/// A handle to a value that may not yet be computed.
///
/// Design:
/// - The transition into a terminal state happens exactly once, under the
///   cell lock. A cancellation racing a completion resolves to whichever
///   landed first; the loser is a no-op.
/// - Continuations are dispatched onto the bound executor (or the ambient
///   runtime when unbound), never run inline on the completing or the
///   registering thread. An already-terminal promise still dispatches, which
///   keeps stack depth bounded under long chains.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn pending(executor: Option<Arc<Executor>>) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cell: Mutex::new(Cell::Pending(Vec::new())),
                done_tx,
                token: CancelToken::new(),
                executor,
            }),
        }
    }

    fn terminal(result: Result<T, SpindleError>) -> Self {
        let (done_tx, _) = watch::channel(true);
        let token = CancelToken::new();
        token.settle();
        Self {
            inner: Arc::new(Inner {
                cell: Mutex::new(Cell::Done(Arc::new(result))),
                done_tx,
                token,
                executor: None,
            }),
        }
    }

    /// Already-completed promise; terminal at construction, zero wait.
    pub fn completed(value: T) -> Self {
        Self::terminal(Ok(value))
    }

    /// Already-failed promise.
    pub fn failed(error: SpindleError) -> Self {
        Self::terminal(Err(error))
    }

    /// Run `task` on the ambient runtime (the shared default pool).
    pub fn run<F>(task: F) -> Self
    where
        F: Future<Output = Result<T, SpindleError>> + Send + 'static,
    {
        let promise = Self::pending(None);
        let completer = promise.clone();
        let handle = tokio::spawn(async move {
            let out = task.await;
            completer.complete(out);
        });
        promise.inner.token.set_abort(handle.abort_handle());
        // The task body cannot report its own panic or abort; watch the join
        // handle and settle the promise on an abnormal end.
        let settler = promise.clone();
        tokio::spawn(async move {
            if let Err(err) = handle.await {
                settler.complete(Err(crate::executor::join_failure(err)));
            }
        });
        promise
    }

    /// Run `task` on a named pool; the promise is bound to that pool.
    pub fn run_on<F>(executor: &Arc<Executor>, task: F) -> Result<Self, SpindleError>
    where
        F: Future<Output = Result<T, SpindleError>> + Send + 'static,
    {
        executor.submit(task)
    }

    pub(crate) fn token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.inner.token)
    }

    /// Settle with `result`. Returns false when a terminal state already
    /// landed; the stored outcome is then left untouched.
    pub(crate) fn complete(&self, result: Result<T, SpindleError>) -> bool {
        let out = Arc::new(result);
        let continuations = {
            let mut cell = self.lock_cell();
            match &mut *cell {
                Cell::Done(_) => return false,
                Cell::Pending(waiting) => {
                    let waiting = std::mem::take(waiting);
                    *cell = Cell::Done(Arc::clone(&out));
                    waiting
                }
            }
        };
        self.inner.token.settle();
        self.inner.done_tx.send_replace(true);
        for continuation in continuations {
            let out = Arc::clone(&out);
            self.dispatch(Box::new(move || continuation(out)));
        }
        true
    }

    /// Register `f` to run once this promise is terminal. Dispatched
    /// asynchronously even when the promise is already terminal.
    pub(crate) fn when_done(&self, f: impl FnOnce(Outcome<T>) + Send + 'static) {
        let out = {
            let mut cell = self.lock_cell();
            match &mut *cell {
                Cell::Pending(waiting) => {
                    waiting.push(Box::new(f));
                    return;
                }
                Cell::Done(out) => Arc::clone(out),
            }
        };
        self.dispatch(Box::new(move || f(out)));
    }

    fn dispatch(&self, f: Box<dyn FnOnce() + Send>) {
        match &self.inner.executor {
            Some(executor) => executor.dispatch(f),
            None => {
                tokio::spawn(async move { f() });
            }
        }
    }

    fn lock_cell(&self) -> MutexGuard<'_, Cell<T>> {
        self.inner.cell.lock().expect("promise cell lock poisoned")
    }

    pub fn state(&self) -> PromiseState {
        match &*self.lock_cell() {
            Cell::Pending(_) => PromiseState::Pending,
            Cell::Done(out) => match out.as_ref() {
                Ok(_) => PromiseState::Completed,
                Err(SpindleError::Cancelled) => PromiseState::Cancelled,
                Err(_) => PromiseState::Failed,
            },
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() != PromiseState::Pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == PromiseState::Cancelled
    }

    /// Cancel. A queued task is prevented from starting; a running one is
    /// aborted at its next await point when `may_interrupt`. Loses to a
    /// completion that already landed. Returns whether this call won the
    /// terminal transition.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let won = self.complete(Err(SpindleError::Cancelled));
        if won && may_interrupt {
            self.inner.token.abort_running();
        }
        won
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// The stored result, if terminal.
    pub fn try_result(&self) -> Option<Result<T, SpindleError>> {
        match &*self.lock_cell() {
            Cell::Done(out) => Some(out.as_ref().clone()),
            Cell::Pending(_) => None,
        }
    }

    /// Wait until terminal; returns the value or re-raises the stored error.
    pub async fn get(&self) -> Result<T, SpindleError> {
        let mut rx = self.inner.done_tx.subscribe();
        loop {
            if let Some(result) = self.try_result() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(SpindleError::Cancelled);
            }
        }
    }

    /// As [`get`](Self::get), bounded by `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, SpindleError> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(SpindleError::Timeout),
        }
    }

    /// Transform the value; a stored failure passes through unchanged. The
    /// continuation runs on the bound executor (or the ambient runtime).
    pub fn then_apply<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let next = Promise::pending(self.inner.executor.clone());
        let completer = next.clone();
        self.when_done(move |out| {
            let result = match out.as_ref() {
                Ok(value) => Ok(f(value.clone())),
                Err(err) => Err(err.clone()),
            };
            completer.complete(result);
        });
        next
    }

    /// Chain a promise-returning continuation; the result promise settles
    /// with the inner promise's outcome.
    pub fn then_compose<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let next = Promise::pending(self.inner.executor.clone());
        let completer = next.clone();
        self.when_done(move |out| match out.as_ref() {
            Ok(value) => {
                let chained = f(value.clone());
                chained.when_done(move |inner_out| {
                    let result = match inner_out.as_ref() {
                        Ok(value) => Ok(value.clone()),
                        Err(err) => Err(err.clone()),
                    };
                    completer.complete(result);
                });
            }
            Err(err) => {
                completer.complete(Err(err.clone()));
            }
        });
        next
    }

    /// Failure-handling continuation: map a stored error into a replacement
    /// outcome. A normal completion passes through unchanged.
    pub fn recover<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(SpindleError) -> Result<T, SpindleError> + Send + 'static,
    {
        let next = Promise::pending(self.inner.executor.clone());
        let completer = next.clone();
        self.when_done(move |out| {
            let result = match out.as_ref() {
                Ok(value) => Ok(value.clone()),
                Err(err) => f(err.clone()),
            };
            completer.complete(result);
        });
        next
    }
}
