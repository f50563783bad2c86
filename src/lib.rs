//! Keyed task distribution over any multi-threaded executor.
//!
//! keylane multiplexes a backend [`Executor`] so that tasks submitted under
//! the same key run **serially, in FIFO order**, while tasks under
//! different keys run in parallel up to the backend's parallelism. The
//! thread running a key's tasks may change between cycles; two tasks with
//! the same key never overlap.
//!
//! # Architecture
//!
//! - [`stripe`] - a fixed pool of mutexes guarding the key→worker map by
//!   hash, so per-key critical sections are cheap and independent
//! - [`future`] - a one-shot completable [`TaskFuture`] with listeners,
//!   cancellation, and timed waits
//! - [`distributor`] - the [`KeyedDistributor`] façade and per-key
//!   [`KeySubmitter`] capability views
//! - [`executor`] - the backend [`Executor`] contract and the inline
//!   [`CallerThreadExecutor`]
//! - [`pool`] - a minimal fixed-size [`ThreadPool`] backend
//! - [`hook`] - the process-wide failure sink for contained task and
//!   listener failures
//!
//! # Example
//!
//! ```
//! use keylane::{DistributorConfig, KeyedDistributor, ThreadPool};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ThreadPool::new(4).expect("pool"));
//! let config = DistributorConfig::default().max_tasks_per_cycle(64);
//! let distributor: KeyedDistributor<String> =
//!     KeyedDistributor::with_config(pool, config).expect("config");
//!
//! // Same key: strictly ordered. Different keys: parallel.
//! let first = distributor.submit("alpha".into(), || {}).expect("submit");
//! let second = distributor.submit_call("alpha".into(), || 7).expect("submit");
//!
//! first.get().expect("ran");
//! assert_eq!(second.get().expect("ran"), 7);
//! ```
//!
//! # Fairness
//!
//! With a bounded `max_tasks_per_cycle`, a worker that exhausts its budget
//! re-dispatches itself to the back of the backend's queue instead of
//! monopolizing a thread, so one hot key cannot starve the others. The
//! budget is a throughput trade-off; the default never yields.

pub mod config;
pub mod distributor;
pub mod error;
pub mod executor;
pub mod future;
pub mod hook;
pub mod pool;
pub mod stripe;

mod worker;

#[doc(hidden)]
pub mod test_utils;

pub use config::DistributorConfig;
pub use distributor::{KeySubmitter, KeyedDistributor};
pub use error::{Error, ErrorCategory, ErrorKind, ErrorSource};
pub use executor::{CallerThreadExecutor, Executor, Job};
pub use future::{Listener, TaskFuture};
pub use hook::{install_failure_hook, reset_failure_hook, FailureHook, StderrFailureHook};
pub use pool::ThreadPool;
pub use stripe::StripedLock;
