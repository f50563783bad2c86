//! A fixed-size thread pool backend.
//!
//! The distributor only needs the [`Executor`] contract, so any
//! multi-threaded backend works; this one exists so the crate is usable
//! out of the box. Workers block on a condvar when idle, drain the queue on
//! shutdown, and contain task panics through the failure hook.

use crate::error::Error;
use crate::executor::{Executor, Job};
use crate::hook;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace};

struct PoolCore {
    queue: Mutex<VecDeque<Job>>,
    work_available: Condvar,
    shutdown: AtomicBool,
}

/// A fixed pool of named worker threads implementing [`Executor`].
///
/// Dropping the pool shuts it down and joins the workers; tasks already
/// queued still run first.
pub struct ThreadPool {
    core: Arc<PoolCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawns `threads` workers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `threads` is zero, or
    /// `SchedulingFailed` if the operating system refuses a thread.
    pub fn new(threads: usize) -> Result<Self, Error> {
        if threads == 0 {
            return Err(Error::invalid_argument("thread count must be > 0"));
        }

        let core = Arc::new(PoolCore {
            queue: Mutex::new(VecDeque::new()),
            work_available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let worker_core = Arc::clone(&core);
            let spawned = std::thread::Builder::new()
                .name(format!("keylane-worker-{index}"))
                .spawn(move || worker_loop(&worker_core));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Release any workers that did start before failing.
                    core.shutdown.store(true, Ordering::SeqCst);
                    core.work_available.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::scheduling_failed("failed to spawn worker thread")
                        .with_source(Arc::new(err)));
                }
            }
        }

        debug!(threads, "thread pool started");
        Ok(Self {
            core,
            workers: Mutex::new(workers),
        })
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stops accepting work and wakes the workers. Already-queued tasks
    /// still run. Idempotent.
    pub fn shutdown(&self) {
        if !self.core.shutdown.swap(true, Ordering::SeqCst) {
            debug!("thread pool shutting down");
        }
        self.core.work_available.notify_all();
    }

    /// Shuts down and blocks until every worker has exited.
    pub fn join(&self) {
        self.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                // Worker bodies contain panics; reaching here means the
                // containment itself failed.
                hook::handle_failure(&Error::new(
                    crate::error::ErrorKind::ExecutionFailed,
                    "pool worker thread panicked",
                ));
            }
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> Result<(), Error> {
        if self.core.shutdown.load(Ordering::SeqCst) {
            return Err(Error::scheduling_failed("thread pool is shut down"));
        }
        self.core.queue.lock().push_back(job);
        self.core.work_available.notify_one();
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.thread_count())
            .field("shutdown", &self.core.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

fn worker_loop(core: &PoolCore) {
    loop {
        let job = {
            let mut queue = core.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                if core.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                core.work_available.wait(&mut queue);
            }
        };
        match job {
            Some(job) => {
                trace!("pool worker picked up a job");
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    hook::handle_failure(&Error::from_panic(payload));
                }
            }
            None => return,
        }
    }
}
