//! One-shot completable future with listeners, cancellation, and timed wait.
//!
//! A [`TaskFuture`] is constructed around the interior work, handed to an
//! executor (directly or through a distributor), and returned to the
//! submitter. Waiters block on `get`; listeners fire exactly once when the
//! future settles.
//!
//! # State machine
//!
//! ```text
//!             ┌──────────────┐
//!             │   pending    │
//!             └──┬───────┬───┘
//!   cancel()    │       │ run() begins
//!   (unstarted) ▼       ▼
//!  ┌────────────────┐ ┌──────────┐
//!  │ cancelled_pre  │ │ running  │
//!  │  (terminal)    │ └─────┬────┘
//!  └────────────────┘       │ success / panic / late cancel
//!                           ▼
//!                     ┌─────────────┐
//!                     │   settled   │
//!                     └─────────────┘
//! ```
//!
//! Transitions are monotonic: once terminal, the only remaining mutation is
//! draining the listener table, which happens exactly once.
//!
//! # Cancellation policy
//!
//! `cancel()` prevents execution only if the task has not started. Cancelling
//! an unstarted future settles it immediately; waiters observe `Cancelled`
//! without waiting for a worker to drain the dead task. Cancelling a running
//! task does not interrupt it - the task finishes and its result is recorded,
//! but waiters that arrive before or after completion observe `Cancelled`.

use crate::error::{Error, ErrorKind};
use crate::executor::{Executor, Job};
use crate::hook;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A completion callback. Fires exactly once, after settlement.
pub type Listener = Box<dyn FnOnce() + Send + 'static>;

enum Work<T> {
    /// A procedure plus the value to settle with when it returns.
    Run {
        task: Box<dyn FnOnce() + Send + 'static>,
        value: T,
    },
    /// A computation whose return value settles the future.
    Call(Box<dyn FnOnce() -> T + Send + 'static>),
}

struct State<T> {
    work: Option<Work<T>>,
    started: bool,
    done: bool,
    cancelled: bool,
    value: Option<T>,
    failure: Option<Error>,
    listeners: SmallVec<[(Listener, Option<Arc<dyn Executor>>); 2]>,
}

impl<T> State<T> {
    fn pending(work: Work<T>) -> Self {
        Self {
            work: Some(work),
            started: false,
            done: false,
            cancelled: false,
            value: None,
            failure: None,
            listeners: SmallVec::new(),
        }
    }

    fn settled(value: Option<T>, failure: Option<Error>) -> Self {
        Self {
            work: None,
            started: true,
            done: true,
            cancelled: false,
            value,
            failure,
            listeners: SmallVec::new(),
        }
    }

    fn take_listeners(&mut self) -> SmallVec<[(Listener, Option<Arc<dyn Executor>>); 2]> {
        std::mem::take(&mut self.listeners)
    }
}

struct Core<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

/// A one-shot result cell that is also the runnable task wrapper.
///
/// Cloning is cheap and produces another handle to the same cell.
pub struct TaskFuture<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("TaskFuture")
            .field("started", &state.started)
            .field("done", &state.done)
            .field("cancelled", &state.cancelled)
            .finish_non_exhaustive()
    }
}

impl<T> TaskFuture<T> {
    fn from_state(state: State<T>) -> Self {
        Self {
            core: Arc::new(Core {
                state: Mutex::new(state),
                settled: Condvar::new(),
            }),
        }
    }

    /// Wraps a procedure; the future settles with `value` when it returns.
    #[must_use]
    pub fn runnable(task: impl FnOnce() + Send + 'static, value: T) -> Self {
        Self::from_state(State::pending(Work::Run {
            task: Box::new(task),
            value,
        }))
    }

    /// Wraps a computation; the future settles with its return value.
    #[must_use]
    pub fn callable(call: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::from_state(State::pending(Work::Call(Box::new(call))))
    }

    /// Creates a future already settled with `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self::from_state(State::settled(Some(value), None))
    }

    /// Creates a future already settled with `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::from_state(State::settled(None, Some(error)))
    }

    /// Executes the interior work and settles the future.
    ///
    /// Skips execution entirely if the future was cancelled before this
    /// call. A panicking task settles the future with `ExecutionFailed` and
    /// the failure is additionally routed to the global failure hook, so a
    /// worker draining many futures keeps going. Calling `run` more than
    /// once is a no-op after the first call.
    pub fn run(&self) {
        let work = {
            let mut state = self.core.state.lock();
            if state.cancelled || state.started || state.done {
                let dead = state.work.take();
                drop(state);
                drop(dead);
                return;
            }
            state.started = true;
            state.work.take()
        };
        let Some(work) = work else { return };

        let outcome = match work {
            Work::Run { task, value } => {
                catch_unwind(AssertUnwindSafe(task)).map(|()| Some(value))
            }
            Work::Call(call) => catch_unwind(AssertUnwindSafe(call)).map(Some),
        };

        let (listeners, failure) = {
            let mut state = self.core.state.lock();
            state.done = true;
            let failure = match outcome {
                Ok(value) => {
                    state.value = value;
                    None
                }
                Err(payload) => {
                    let err = Error::from_panic(payload);
                    state.failure = Some(err.clone());
                    Some(err)
                }
            };
            self.core.settled.notify_all();
            (state.take_listeners(), failure)
        };

        for (listener, executor) in listeners {
            Self::dispatch_listener(listener, executor);
        }
        if let Some(err) = failure {
            hook::handle_failure(&err);
        }
    }

    /// Cancels the future. Returns `true` if the task had not yet started
    /// (its body will never execute); `false` otherwise.
    ///
    /// Cancelling an unstarted future is terminal: waiters are released
    /// immediately and pending listeners fire. Cancelling a started future
    /// marks it cancelled for waiters but does not interrupt the task.
    /// Cancelling an already-settled future has no effect.
    pub fn cancel(&self) -> bool {
        let (unstarted, dead_work, listeners) = {
            let mut state = self.core.state.lock();
            if state.done {
                return !state.started;
            }
            state.cancelled = true;
            let unstarted = !state.started;
            let dead_work = if unstarted {
                state.done = true;
                state.work.take()
            } else {
                None
            };
            self.core.settled.notify_all();
            (unstarted, dead_work, state.take_listeners())
        };

        drop(dead_work);
        for (listener, executor) in listeners {
            Self::dispatch_listener(listener, executor);
        }
        unstarted
    }

    /// Returns true once the future has settled.
    ///
    /// A cancelled-before-start future is settled; a cancelled-while-running
    /// future settles when the task finishes.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.core.state.lock().done
    }

    /// Returns true if the future was cancelled before the task started.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        let state = self.core.state.lock();
        state.cancelled && !state.started
    }

    /// Registers a completion listener, running inline on the completing
    /// thread (or immediately on this thread if already settled).
    pub fn add_listener(&self, listener: impl FnOnce() + Send + 'static) {
        self.add_listener_inner(Box::new(listener), None);
    }

    /// Registers a completion listener dispatched through `executor`.
    pub fn add_listener_with(
        &self,
        listener: impl FnOnce() + Send + 'static,
        executor: Arc<dyn Executor>,
    ) {
        self.add_listener_inner(Box::new(listener), Some(executor));
    }

    fn add_listener_inner(&self, listener: Listener, executor: Option<Arc<dyn Executor>>) {
        let immediate = {
            let mut state = self.core.state.lock();
            if state.done || state.cancelled {
                Some((listener, executor))
            } else {
                state.listeners.push((listener, executor));
                None
            }
        };
        if let Some((listener, executor)) = immediate {
            Self::dispatch_listener(listener, executor);
        }
    }

    fn dispatch_listener(listener: Listener, executor: Option<Arc<dyn Executor>>) {
        match executor {
            Some(executor) => {
                if let Err(err) = executor.execute(listener) {
                    hook::handle_failure(&err);
                }
            }
            None => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(listener)) {
                    hook::handle_failure(&Error::from_panic(payload));
                }
            }
        }
    }
}

impl<T: Clone> TaskFuture<T> {
    /// Blocks until the future settles and returns the result.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the future was cancelled (before or after start)
    /// - `ExecutionFailed` if the task panicked
    pub fn get(&self) -> Result<T, Error> {
        let mut state = self.core.state.lock();
        while !state.done && !state.cancelled {
            self.core.settled.wait(&mut state);
        }
        Self::settled_result(&state)
    }

    /// Blocks up to `timeout` for the future to settle.
    ///
    /// Measured against a monotonic clock; spurious wakeups re-arm against
    /// the remaining budget.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus `Timeout` if the wait elapses first.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        while !state.done && !state.cancelled {
            if self.core.settled.wait_until(&mut state, deadline).timed_out()
                && !state.done
                && !state.cancelled
            {
                return Err(Error::timeout());
            }
        }
        Self::settled_result(&state)
    }

    fn settled_result(state: &State<T>) -> Result<T, Error> {
        if state.cancelled {
            return Err(Error::cancelled());
        }
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        match &state.value {
            Some(value) => Ok(value.clone()),
            None => Err(Error::new(
                ErrorKind::ExecutionFailed,
                "future settled without a value",
            )),
        }
    }
}

impl<T: Send + 'static> TaskFuture<T> {
    /// Boxes this future as a job that runs it; the handle stays with the
    /// submitter.
    pub(crate) fn as_job(&self) -> Job {
        let future = self.clone();
        Box::new(move || future.run())
    }
}
