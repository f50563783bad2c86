//! The keyed distributor façade and its per-key submitter views.
//!
//! [`KeyedDistributor`] multiplexes a multi-threaded [`Executor`] so that
//! tasks submitted under the same key run serially, in submission order,
//! while tasks under different keys run in parallel up to the backend's
//! parallelism. The thread running a key's tasks may differ between cycles,
//! but no two tasks with the same key ever overlap.
//!
//! The backend should have at least as many threads as keys expected to be
//! active in parallel; a starved backend lets some keys progress while
//! others wait.
//!
//! # Example
//!
//! ```
//! use keylane::{KeyedDistributor, ThreadPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ThreadPool::new(4).expect("pool"));
//! let distributor: KeyedDistributor<&str> = KeyedDistributor::new(pool);
//!
//! let future = distributor.submit_call("user-42", || 2 + 2).expect("submit");
//! assert_eq!(future.get().expect("settled"), 4);
//! ```

use crate::config::DistributorConfig;
use crate::error::Error;
use crate::executor::{Executor, Job};
use crate::future::TaskFuture;
use crate::stripe::StripedLock;
use crate::worker::{KeyWorker, PendingQueue};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Shared distributor state: the backend, the striped key→worker map, and
/// the fairness budget.
pub(crate) struct DistributorCore<K> {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) shards: StripedLock<HashMap<K, PendingQueue>>,
    pub(crate) max_tasks_per_cycle: usize,
}

/// Routes keyed submissions onto a multi-threaded backend with per-key
/// serial FIFO execution.
///
/// Cloning is cheap and produces another handle to the same distributor.
pub struct KeyedDistributor<K> {
    core: Arc<DistributorCore<K>>,
}

impl<K> Clone for KeyedDistributor<K> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K> std::fmt::Debug for KeyedDistributor<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedDistributor")
            .field("stripes", &self.core.shards.stripe_count())
            .field("max_tasks_per_cycle", &self.core.max_tasks_per_cycle)
            .finish_non_exhaustive()
    }
}

impl<K: Hash + Eq + Clone + Send + 'static> KeyedDistributor<K> {
    /// Creates a distributor over `executor` with default configuration
    /// (expected concurrency 16, no cycle budget).
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let config = DistributorConfig::default();
        Self::from_validated(executor, &config)
    }

    /// Creates a distributor with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration fails validation;
    /// nothing is constructed in that case.
    pub fn with_config(
        executor: Arc<dyn Executor>,
        config: DistributorConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::from_validated(executor, &config))
    }

    fn from_validated(executor: Arc<dyn Executor>, config: &DistributorConfig) -> Self {
        debug!(
            expected_concurrency = config.expected_concurrency,
            max_tasks_per_cycle = config.max_tasks_per_cycle,
            "creating keyed distributor"
        );
        Self {
            core: Arc::new(DistributorCore {
                executor,
                shards: StripedLock::new(config.expected_concurrency),
                max_tasks_per_cycle: config.max_tasks_per_cycle,
            }),
        }
    }

    /// Queues `task` to run under `key`, after everything already queued for
    /// that key.
    ///
    /// Fire-and-forget: no future is allocated. A panicking task is routed
    /// to the global failure hook.
    ///
    /// # Errors
    ///
    /// Returns `SchedulingFailed` if a new worker had to be created and the
    /// backend refused it. The worker is removed again before returning, so
    /// a retry can install a fresh one. Tasks already queued for the key are
    /// unaffected.
    pub fn execute(&self, key: K, task: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.add_job(key, Box::new(task))
    }

    /// Queues `task` under `key` and returns a future that settles with `()`
    /// when it has run.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit(
        &self,
        key: K,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<TaskFuture<()>, Error> {
        self.submit_with_result(key, task, ())
    }

    /// Queues `task` under `key` and returns a future that settles with
    /// `value` when the task has run.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_with_result<T: Send + 'static>(
        &self,
        key: K,
        task: impl FnOnce() + Send + 'static,
        value: T,
    ) -> Result<TaskFuture<T>, Error> {
        let future = TaskFuture::runnable(task, value);
        self.add_job(key, future.as_job())?;
        Ok(future)
    }

    /// Queues `call` under `key` and returns a future that settles with its
    /// return value.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_call<T: Send + 'static>(
        &self,
        key: K,
        call: impl FnOnce() -> T + Send + 'static,
    ) -> Result<TaskFuture<T>, Error> {
        let future = TaskFuture::callable(call);
        self.add_job(key, future.as_job())?;
        Ok(future)
    }

    /// Returns a submitter bound to `key`; everything submitted through it
    /// runs serially under that key.
    #[must_use]
    pub fn submitter_for_key(&self, key: K) -> KeySubmitter<K> {
        KeySubmitter {
            distributor: self.clone(),
            key,
        }
    }

    /// Returns the backend executor tasks are distributed to.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.core.executor
    }

    /// Returns the per-cycle task budget (`usize::MAX` means no yield).
    #[must_use]
    pub fn max_tasks_per_cycle(&self) -> usize {
        self.core.max_tasks_per_cycle
    }

    /// Counts tasks currently queued across all keys.
    ///
    /// Consistent per stripe, not globally atomic; intended for monitoring.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.core
            .shards
            .fold_shards(0, |acc, shard| acc + shard.values().map(PendingQueue::len).sum::<usize>())
    }

    /// Enqueues under the key's stripe lock: append to the live worker, or
    /// install a fresh one and dispatch it.
    fn add_job(&self, key: K, job: Job) -> Result<(), Error> {
        let mut shard = self.core.shards.lock_for(&key);
        if let Some(queue) = shard.get_mut(&key) {
            queue.push(job);
            return Ok(());
        }

        shard.insert(key.clone(), PendingQueue::with_first(job));
        let worker = KeyWorker::new(Arc::clone(&self.core), key.clone());
        if let Err(err) = worker.dispatch() {
            // Roll back under the same lock so a retry installs cleanly.
            shard.remove(&key);
            debug!(%err, "backend rejected new key worker");
            return Err(err);
        }
        Ok(())
    }
}

impl<K: Hash + Eq + Clone + Send + Sync + 'static> KeyedDistributor<K> {
    /// Returns an [`Executor`] view bound to `key`.
    #[must_use]
    pub fn executor_for_key(&self, key: K) -> Arc<dyn Executor> {
        Arc::new(self.submitter_for_key(key))
    }
}

/// A capability view of a [`KeyedDistributor`] bound to a single key.
///
/// Holds nothing beyond the key and a distributor handle; cloning shares
/// both.
pub struct KeySubmitter<K> {
    distributor: KeyedDistributor<K>,
    key: K,
}

impl<K: Clone> Clone for KeySubmitter<K> {
    fn clone(&self) -> Self {
        Self {
            distributor: self.distributor.clone(),
            key: self.key.clone(),
        }
    }
}

impl<K: Hash + Eq + Clone + Send + 'static> KeySubmitter<K> {
    /// Returns the key this submitter is bound to.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Queues `task` under this submitter's key.
    ///
    /// # Errors
    ///
    /// As [`KeyedDistributor::execute`].
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.distributor.execute(self.key.clone(), task)
    }

    /// Queues `task` and returns a completion future.
    ///
    /// # Errors
    ///
    /// As [`KeyedDistributor::execute`].
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<TaskFuture<()>, Error> {
        self.distributor.submit(self.key.clone(), task)
    }

    /// Queues `task` and returns a future settling with `value`.
    ///
    /// # Errors
    ///
    /// As [`KeyedDistributor::execute`].
    pub fn submit_with_result<T: Send + 'static>(
        &self,
        task: impl FnOnce() + Send + 'static,
        value: T,
    ) -> Result<TaskFuture<T>, Error> {
        self.distributor
            .submit_with_result(self.key.clone(), task, value)
    }

    /// Queues `call` and returns a future settling with its return value.
    ///
    /// # Errors
    ///
    /// As [`KeyedDistributor::execute`].
    pub fn submit_call<T: Send + 'static>(
        &self,
        call: impl FnOnce() -> T + Send + 'static,
    ) -> Result<TaskFuture<T>, Error> {
        self.distributor.submit_call(self.key.clone(), call)
    }
}

impl<K: Hash + Eq + Clone + Send + Sync + 'static> Executor for KeySubmitter<K> {
    fn execute(&self, job: Job) -> Result<(), Error> {
        self.distributor.add_job(self.key.clone(), job)
    }
}
