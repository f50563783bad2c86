//! Per-key serial worker: FIFO queue and cooperative drain loop.
//!
//! Exactly one worker per live key is ever runnable (the single-runner
//! discipline): a worker is dispatched to the backend only when it is
//! installed in the shard map (under the key's stripe lock), or by its own
//! running instance at the yield point, where it is still installed and so
//! cannot be dispatched by anyone else. Removal happens only when the
//! worker's own loop observes an empty queue under the stripe lock.

use crate::distributor::DistributorCore;
use crate::error::Error;
use crate::executor::Job;
use crate::hook;
use std::collections::VecDeque;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// Initial FIFO capacity; submission bursts usually stay under this.
const INITIAL_QUEUE_CAPACITY: usize = 8;

/// A key's pending FIFO. Only ever touched under the key's stripe lock.
pub(crate) struct PendingQueue {
    jobs: VecDeque<Job>,
}

impl PendingQueue {
    /// Creates a queue seeded with the worker's first task.
    pub(crate) fn with_first(job: Job) -> Self {
        let mut jobs = VecDeque::with_capacity(INITIAL_QUEUE_CAPACITY);
        jobs.push_back(job);
        Self { jobs }
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Detaches up to `max` tasks from the front, preserving order.
    ///
    /// When the whole queue fits the budget the backing storage is swapped
    /// out wholesale instead of copied element by element.
    pub(crate) fn take_batch(&mut self, max: usize) -> VecDeque<Job> {
        if self.jobs.len() <= max {
            std::mem::replace(
                &mut self.jobs,
                VecDeque::with_capacity(INITIAL_QUEUE_CAPACITY),
            )
        } else {
            self.jobs.drain(..max).collect()
        }
    }
}

/// The drain loop for one key. Consumed per dispatch; the yield path mints
/// a fresh instance for the re-dispatch.
pub(crate) struct KeyWorker<K> {
    core: Arc<DistributorCore<K>>,
    key: K,
}

enum Step {
    /// Queue observed empty; worker removed from the map.
    Drained,
    /// Cycle budget spent; a re-dispatch of this worker is now queued.
    Yielded,
    /// Tasks detached for execution outside the lock.
    Batch(VecDeque<Job>),
}

impl<K: Hash + Eq + Clone + Send + 'static> KeyWorker<K> {
    pub(crate) fn new(core: Arc<DistributorCore<K>>, key: K) -> Self {
        Self { core, key }
    }

    /// Hands this worker to the backend executor.
    ///
    /// Called with the key's stripe lock held, so installation and dispatch
    /// are atomic with respect to other submitters.
    pub(crate) fn dispatch(self) -> Result<(), Error> {
        let executor = Arc::clone(&self.core.executor);
        executor.execute(Box::new(move || self.run()))
    }

    /// Drains the key's FIFO, yielding after `max_tasks_per_cycle` tasks.
    fn run(self) {
        let mut consumed = 0_usize;
        loop {
            let step = self.next_step(&mut consumed);
            match step {
                Step::Drained | Step::Yielded => return,
                Step::Batch(batch) => {
                    for job in batch {
                        run_contained(job);
                    }
                }
            }
        }
    }

    /// One trip under the stripe lock: decide to stop, yield, or detach a
    /// batch. The lock is released before any task runs.
    fn next_step(&self, consumed: &mut usize) -> Step {
        let budget = self.core.max_tasks_per_cycle;
        let mut shard = self.core.shards.lock_for(&self.key);
        let Some(queue) = shard.get_mut(&self.key) else {
            return Step::Drained;
        };

        if queue.is_empty() {
            shard.remove(&self.key);
            trace!(consumed = *consumed, "key worker drained, leaving map");
            return Step::Drained;
        }

        if *consumed >= budget {
            // Still installed in the map, so no submitter can dispatch a
            // second runner; only this re-dispatch can continue the key.
            let next = Self::new(Arc::clone(&self.core), self.key.clone());
            match self.core.executor.execute(Box::new(move || next.run())) {
                Ok(()) => {
                    trace!(consumed = *consumed, "key worker yielding");
                    return Step::Yielded;
                }
                Err(err) => {
                    // Keep draining inline: fairness degrades, the key's
                    // liveness and FIFO order do not.
                    hook::handle_failure(&err);
                    *consumed = 0;
                }
            }
        }

        let batch = queue.take_batch(budget - *consumed);
        *consumed += batch.len();
        Step::Batch(batch)
    }
}

/// Runs one task, containing any panic so the drain loop continues.
fn run_contained(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        hook::handle_failure(&Error::from_panic(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn noop_job() -> Job {
        Box::new(|| {})
    }

    #[test]
    fn queue_starts_with_first_task() {
        init_test("queue_starts_with_first_task");
        let queue = PendingQueue::with_first(noop_job());
        crate::assert_with_log!(queue.len() == 1, "len", 1usize, queue.len());
        assert!(!queue.is_empty());
        crate::test_complete!("queue_starts_with_first_task");
    }

    #[test]
    fn take_batch_whole_queue_swaps() {
        init_test("take_batch_whole_queue_swaps");
        let mut queue = PendingQueue::with_first(noop_job());
        queue.push(noop_job());
        queue.push(noop_job());

        let batch = queue.take_batch(10);
        crate::assert_with_log!(batch.len() == 3, "batch len", 3usize, batch.len());
        assert!(queue.is_empty());
        crate::test_complete!("take_batch_whole_queue_swaps");
    }

    #[test]
    fn take_batch_subset_preserves_remainder() {
        init_test("take_batch_subset_preserves_remainder");
        let order = Arc::new(AtomicUsize::new(0));
        let mut queue = {
            let order = Arc::clone(&order);
            PendingQueue::with_first(Box::new(move || {
                order.store(1, Ordering::SeqCst);
            }))
        };
        for i in 2..=4_usize {
            let order = Arc::clone(&order);
            queue.push(Box::new(move || {
                order.store(i, Ordering::SeqCst);
            }));
        }

        let batch = queue.take_batch(2);
        crate::assert_with_log!(batch.len() == 2, "batch len", 2usize, batch.len());
        crate::assert_with_log!(queue.len() == 2, "remaining", 2usize, queue.len());

        // Batch holds the oldest tasks, in order.
        for job in batch {
            job();
        }
        crate::assert_with_log!(
            order.load(Ordering::SeqCst) == 2,
            "last batch task",
            2usize,
            order.load(Ordering::SeqCst)
        );
        crate::test_complete!("take_batch_subset_preserves_remainder");
    }

    #[test]
    fn take_batch_exact_budget_swaps() {
        init_test("take_batch_exact_budget_swaps");
        let mut queue = PendingQueue::with_first(noop_job());
        queue.push(noop_job());
        let batch = queue.take_batch(2);
        crate::assert_with_log!(batch.len() == 2, "batch len", 2usize, batch.len());
        assert!(queue.is_empty());
        crate::test_complete!("take_batch_exact_budget_swaps");
    }

    #[test]
    fn run_contained_swallows_panics() {
        init_test("run_contained_swallows_panics");
        let _serial = crate::test_utils::hook_serial();
        let hook = crate::hook::test_support::RecordingHook::install();

        run_contained(Box::new(|| panic!("contained")));

        crate::assert_with_log!(hook.count() == 1, "hook count", 1usize, hook.count());
        crate::hook::reset_failure_hook();
        crate::test_complete!("run_contained_swallows_panics");
    }
}
