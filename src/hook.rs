//! Process-wide failure hook.
//!
//! Task and listener failures inside a worker loop must never unwind into
//! the backend executor: they are caught and handed to a single process-wide
//! sink. The embedding application installs its own sink at init with
//! [`install_failure_hook`]; until then a default that writes to standard
//! error is used.
//!
//! The hook is invoked for:
//!
//! - a task that panics while a key worker is draining its queue
//! - a listener that panics during inline dispatch
//! - a failure caught by [`CallerThreadExecutor::execute`](crate::executor::CallerThreadExecutor)
//! - a yield re-dispatch the backend executor refused

use crate::error::Error;
use parking_lot::RwLock;
use std::sync::Arc;

/// A process-wide sink for contained failures.
pub trait FailureHook: Send + Sync {
    /// Handles one contained failure. Must not panic.
    fn on_failure(&self, error: &Error);
}

/// Default hook: writes the failure to standard error and emits a tracing
/// event for subscribers that want structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrFailureHook;

impl FailureHook for StderrFailureHook {
    fn on_failure(&self, error: &Error) {
        tracing::error!(kind = %error.kind(), %error, "unhandled task failure");
        eprintln!("keylane: unhandled task failure: {error}");
    }
}

static HOOK: RwLock<Option<Arc<dyn FailureHook>>> = RwLock::new(None);

/// Installs a new process-wide failure hook, returning the previous one if
/// any was explicitly installed.
pub fn install_failure_hook(hook: Arc<dyn FailureHook>) -> Option<Arc<dyn FailureHook>> {
    HOOK.write().replace(hook)
}

/// Removes any installed hook, restoring the stderr default.
pub fn reset_failure_hook() -> Option<Arc<dyn FailureHook>> {
    HOOK.write().take()
}

/// Routes a contained failure to the installed hook (or the default).
pub fn handle_failure(error: &Error) {
    let hook = HOOK.read().clone();
    match hook {
        Some(hook) => hook.on_failure(error),
        None => StderrFailureHook.on_failure(error),
    }
}
