//! Shared helpers for the integration suites.

#![allow(dead_code)]

use keylane::{Error, FailureHook, ThreadPool};
use std::sync::{Arc, Mutex, MutexGuard};

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn pool(threads: usize) -> Arc<ThreadPool> {
    Arc::new(ThreadPool::new(threads).expect("test pool"))
}

/// Records every failure routed to the global hook.
#[derive(Debug, Default)]
pub struct RecordingHook {
    seen: Mutex<Vec<Error>>,
}

impl RecordingHook {
    pub fn install() -> Arc<Self> {
        let hook = Arc::new(Self::default());
        keylane::install_failure_hook(Arc::clone(&hook) as Arc<dyn FailureHook>);
        hook
    }

    pub fn count(&self) -> usize {
        self.seen.lock().expect("hook lock").len()
    }

    pub fn drain(&self) -> Vec<Error> {
        std::mem::take(&mut *self.seen.lock().expect("hook lock"))
    }
}

impl FailureHook for RecordingHook {
    fn on_failure(&self, error: &Error) {
        self.seen.lock().expect("hook lock").push(error.clone());
    }
}

/// Serializes tests that install a process-global failure hook.
pub fn hook_serial() -> MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().expect("serial lock")
}
