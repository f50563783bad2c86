//! The executor seam and the caller-thread submitter.
//!
//! [`Executor`] is the single-operation backend contract the distributor
//! consumes: hand over a boxed job, run it eventually on some thread.
//! [`CallerThreadExecutor`] is the degenerate implementation that runs jobs
//! synchronously on the calling thread; it is the default listener executor
//! and a convenient way to mint already-settled futures.

use crate::error::Error;
use crate::future::TaskFuture;
use crate::hook;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A multi-threaded execution backend.
///
/// `execute` must eventually run the job on some thread, or fail
/// synchronously with a scheduling error. Implementations used as a
/// distributor backend must not run the job on the submitting call stack:
/// the distributor dispatches workers while holding a stripe lock, and an
/// inline backend would re-enter it.
pub trait Executor: Send + Sync {
    /// Schedules `job` to run.
    ///
    /// # Errors
    ///
    /// Returns a `SchedulingFailed` error if the job cannot be scheduled
    /// (for example, the backend has shut down). On error the job is
    /// dropped without running.
    fn execute(&self, job: Job) -> Result<(), Error>;
}

/// An executor that runs every task synchronously on the calling thread.
///
/// Differs from invoking the task directly only in that nothing propagates
/// out of `execute`: a panicking task is caught and routed to the global
/// failure hook, and the `submit` family represents failures through the
/// returned future instead. There is no state, so one instance can be
/// shared freely.
///
/// This is the default listener executor; it is not a valid distributor
/// backend (see [`Executor`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct CallerThreadExecutor;

impl CallerThreadExecutor {
    /// Creates a caller-thread executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs `task` inline and returns a settled future carrying `value`,
    /// or the task's failure if it panicked.
    pub fn submit_with_result<T>(&self, task: impl FnOnce(), value: T) -> TaskFuture<T> {
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => TaskFuture::completed(value),
            Err(payload) => TaskFuture::failed(Error::from_panic(payload)),
        }
    }

    /// Runs `task` inline and returns a settled `TaskFuture<()>`.
    pub fn submit(&self, task: impl FnOnce()) -> TaskFuture<()> {
        self.submit_with_result(task, ())
    }

    /// Runs `call` inline and returns a settled future carrying its result
    /// or failure.
    pub fn submit_call<T>(&self, call: impl FnOnce() -> T) -> TaskFuture<T> {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(value) => TaskFuture::completed(value),
            Err(payload) => TaskFuture::failed(Error::from_panic(payload)),
        }
    }
}

impl Executor for CallerThreadExecutor {
    fn execute(&self, job: Job) -> Result<(), Error> {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            hook::handle_failure(&Error::from_panic(payload));
        }
        Ok(())
    }
}
