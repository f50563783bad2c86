//! Striped lock: a fixed pool of mutexes indexed by key hash.
//!
//! Coarser than a lock per key (bounded memory, no per-key allocation) but
//! finer than one global lock (independent keys contend only on hash
//! collisions). Each stripe owns the slice of shared state it protects, so
//! "hold the stripe lock" and "access the shard" are the same operation and
//! cannot be done separately.
//!
//! Stripe selection is deterministic per instance: equal keys always map to
//! the same stripe for the lifetime of the lock. There are no fairness
//! guarantees between stripes.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

/// A power-of-two pool of mutex-guarded shards selected by key hash.
pub struct StripedLock<T> {
    stripes: Box<[Mutex<T>]>,
    mask: usize,
    hasher: RandomState,
}

impl<T: Default> StripedLock<T> {
    /// Creates a striped lock sized for the expected number of threads
    /// touching distinct keys concurrently.
    ///
    /// The pool size is `expected_concurrency` rounded up to the next power
    /// of two (minimum 1), so stripe selection is a mask instead of a
    /// division.
    #[must_use]
    pub fn new(expected_concurrency: usize) -> Self {
        let count = expected_concurrency.max(1).next_power_of_two();
        let stripes: Box<[Mutex<T>]> = (0..count).map(|_| Mutex::new(T::default())).collect();
        Self {
            mask: count - 1,
            stripes,
            hasher: RandomState::new(),
        }
    }
}

impl<T> StripedLock<T> {
    /// Returns the fixed number of stripes.
    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Returns the stripe index for `key`. Stable for equal keys.
    #[inline]
    #[must_use]
    pub fn index_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & self.mask
    }

    /// Locks the stripe that guards `key`'s shard.
    #[inline]
    pub fn lock_for<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, T> {
        self.lock_at(self.index_for(key))
    }

    /// Locks the stripe at `index` directly.
    ///
    /// # Panics
    ///
    /// Panics if `index >= stripe_count()`.
    #[inline]
    pub fn lock_at(&self, index: usize) -> MutexGuard<'_, T> {
        self.stripes[index].lock()
    }

    /// Folds over every shard, locking each stripe in turn.
    ///
    /// Stripes are visited in index order and each lock is released before
    /// the next is taken, so the result is a per-stripe-consistent (not
    /// globally atomic) view.
    pub fn fold_shards<A>(&self, init: A, mut f: impl FnMut(A, &T) -> A) -> A {
        let mut acc = init;
        for stripe in self.stripes.iter() {
            let guard = stripe.lock();
            acc = f(acc, &guard);
        }
        acc
    }
}

impl<T> std::fmt::Debug for StripedLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedLock")
            .field("stripes", &self.stripes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn rounds_up_to_power_of_two() {
        init_test("rounds_up_to_power_of_two");
        let lock: StripedLock<u32> = StripedLock::new(5);
        crate::assert_with_log!(
            lock.stripe_count() == 8,
            "stripe count",
            8usize,
            lock.stripe_count()
        );
        crate::test_complete!("rounds_up_to_power_of_two");
    }

    #[test]
    fn zero_concurrency_gets_one_stripe() {
        init_test("zero_concurrency_gets_one_stripe");
        let lock: StripedLock<u32> = StripedLock::new(0);
        crate::assert_with_log!(
            lock.stripe_count() == 1,
            "stripe count",
            1usize,
            lock.stripe_count()
        );
        crate::test_complete!("zero_concurrency_gets_one_stripe");
    }

    #[test]
    fn exact_power_of_two_is_kept() {
        init_test("exact_power_of_two_is_kept");
        let lock: StripedLock<u32> = StripedLock::new(16);
        crate::assert_with_log!(
            lock.stripe_count() == 16,
            "stripe count",
            16usize,
            lock.stripe_count()
        );
        crate::test_complete!("exact_power_of_two_is_kept");
    }

    #[test]
    fn equal_keys_select_equal_stripes() {
        init_test("equal_keys_select_equal_stripes");
        let lock: StripedLock<u32> = StripedLock::new(16);
        for key in 0..1000_u64 {
            let first = lock.index_for(&key);
            let second = lock.index_for(&key);
            crate::assert_with_log!(first == second, "stable index", first, second);
        }
        crate::test_complete!("equal_keys_select_equal_stripes");
    }

    #[test]
    fn index_is_in_range() {
        init_test("index_is_in_range");
        let lock: StripedLock<u32> = StripedLock::new(4);
        for key in 0..1000_u64 {
            assert!(lock.index_for(&key) < lock.stripe_count());
        }
        crate::test_complete!("index_is_in_range");
    }

    #[test]
    fn keys_spread_over_multiple_stripes() {
        init_test("keys_spread_over_multiple_stripes");
        let lock: StripedLock<u32> = StripedLock::new(16);
        let mut hit = vec![false; lock.stripe_count()];
        for key in 0..10_000_u64 {
            hit[lock.index_for(&key)] = true;
        }
        let used = hit.iter().filter(|h| **h).count();
        // 10k random-ish keys over 16 stripes should touch most of them.
        assert!(used >= lock.stripe_count() / 2, "only {used} stripes used");
        crate::test_complete!("keys_spread_over_multiple_stripes");
    }

    #[test]
    fn shard_mutation_under_stripe_lock() {
        init_test("shard_mutation_under_stripe_lock");
        let lock: StripedLock<Vec<u64>> = StripedLock::new(4);
        lock.lock_for(&7_u64).push(7);
        lock.lock_for(&7_u64).push(7);
        let total = lock.fold_shards(0, |acc, shard| acc + shard.len());
        crate::assert_with_log!(total == 2, "total entries", 2usize, total);
        crate::test_complete!("shard_mutation_under_stripe_lock");
    }

    #[test]
    fn concurrent_counters_do_not_lose_updates() {
        init_test("concurrent_counters_do_not_lose_updates");
        let lock: Arc<StripedLock<u64>> = Arc::new(StripedLock::new(8));
        let threads = 4;
        let per_thread = 1000_u64;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let key = t * per_thread + i;
                        *lock.lock_for(&key) += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        let total = lock.fold_shards(0, |acc, shard| acc + shard);
        crate::assert_with_log!(
            total == threads * per_thread,
            "total count",
            threads * per_thread,
            total
        );
        crate::test_complete!("concurrent_counters_do_not_lose_updates");
    }
}
