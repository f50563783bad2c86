//! Property suites for the ordering and exactly-once guarantees.

mod common;

use common::pool;
use keylane::{DistributorConfig, KeyedDistributor, StripedLock};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

/// Workload shape: task count per key, plus a cycle budget.
fn workloads() -> impl Strategy<Value = (Vec<usize>, usize)> {
    let counts = prop::collection::vec(1..30_usize, 1..6);
    let budget = prop_oneof![Just(1_usize), Just(2_usize), Just(5_usize), Just(usize::MAX)];
    (counts, budget)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    })]

    /// For every key, observed execution order equals submission order and
    /// every task runs exactly once, regardless of the cycle budget.
    #[test]
    fn per_key_fifo_and_exactly_once((counts, budget) in workloads()) {
        let config = DistributorConfig::default().max_tasks_per_cycle(budget);
        let distributor: KeyedDistributor<usize> =
            KeyedDistributor::with_config(pool(4), config).expect("config");

        let logs: Vec<Arc<Mutex<Vec<usize>>>> =
            counts.iter().map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

        let mut futures = Vec::new();
        for (key, &count) in counts.iter().enumerate() {
            for index in 0..count {
                let log = Arc::clone(&logs[key]);
                futures.push(
                    distributor
                        .submit(key, move || log.lock().expect("log lock").push(index))
                        .expect("submit"),
                );
            }
        }
        for future in futures {
            future.get().expect("settled");
        }

        for (key, &count) in counts.iter().enumerate() {
            let seen = logs[key].lock().expect("log lock").clone();
            prop_assert_eq!(seen, (0..count).collect::<Vec<_>>());
        }
    }

    /// Submissions interleaved from several threads still keep each
    /// submitter's own per-key order (each submitter owns one key).
    #[test]
    fn concurrent_submitters_keep_their_own_order(
        per_thread in 1..40_usize,
        budget in prop_oneof![Just(1_usize), Just(usize::MAX)],
    ) {
        let config = DistributorConfig::default().max_tasks_per_cycle(budget);
        let distributor: KeyedDistributor<usize> =
            KeyedDistributor::with_config(pool(4), config).expect("config");

        let threads = 3_usize;
        let logs: Vec<Arc<Mutex<Vec<usize>>>> =
            (0..threads).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

        let handles: Vec<_> = (0..threads)
            .map(|key| {
                let distributor = distributor.clone();
                let log = Arc::clone(&logs[key]);
                std::thread::spawn(move || {
                    let mut futures = Vec::new();
                    for index in 0..per_thread {
                        let log = Arc::clone(&log);
                        futures.push(
                            distributor
                                .submit(key, move || log.lock().expect("log lock").push(index))
                                .expect("submit"),
                        );
                    }
                    for future in futures {
                        future.get().expect("settled");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("submitter thread");
        }

        for log in &logs {
            let seen = log.lock().expect("log lock").clone();
            prop_assert_eq!(seen, (0..per_thread).collect::<Vec<_>>());
        }
    }

    /// Stripe selection is stable and in range for any key and sizing hint.
    #[test]
    fn stripe_selection_is_stable(keys in prop::collection::vec(any::<u64>(), 1..50),
                                  concurrency in 1..64_usize) {
        let lock: StripedLock<u32> = StripedLock::new(concurrency);
        prop_assert!(lock.stripe_count().is_power_of_two());
        prop_assert!(lock.stripe_count() >= concurrency);
        for key in &keys {
            let index = lock.index_for(key);
            prop_assert!(index < lock.stripe_count());
            prop_assert_eq!(index, lock.index_for(key));
        }
    }
}
