//! Error types and error handling strategy for keylane.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Task failures are contained: they settle the submitting future or go to
//!   the process-wide failure hook, and never unwind through a worker loop
//! - Configuration errors are raised synchronously, before any state changes
//!
//! # Error Categories
//!
//! - **Configuration**: caller passed an invalid argument
//! - **Dispatch**: the backend executor refused to schedule a worker
//! - **Settlement**: how a future's `get` reports a non-success terminal state

use core::fmt;
use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

/// Shared, cloneable reference to an underlying cause.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Configuration ===
    /// Caller passed a zero or out-of-range value where forbidden.
    InvalidArgument,

    // === Dispatch ===
    /// The backend executor refused to schedule a worker.
    SchedulingFailed,

    // === Settlement ===
    /// The underlying task panicked or failed while running.
    ExecutionFailed,
    /// The future was cancelled before the task started.
    Cancelled,
    /// A timed wait elapsed before the future settled.
    Timeout,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument => ErrorCategory::Configuration,
            Self::SchedulingFailed => ErrorCategory::Dispatch,
            Self::ExecutionFailed | Self::Cancelled | Self::Timeout => ErrorCategory::Settlement,
        }
    }

    /// Returns true if retrying the same call can reasonably succeed.
    ///
    /// Only `SchedulingFailed` qualifies: the distributor removes the
    /// half-installed worker before returning it, so a retry installs a
    /// fresh one. `Timeout` callers should wait again rather than resubmit.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SchedulingFailed)
    }

    /// Returns a human-readable name for the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::SchedulingFailed => "scheduling failed",
            Self::ExecutionFailed => "execution failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timed out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid caller-supplied configuration.
    Configuration,
    /// Backend dispatch failures.
    Dispatch,
    /// Terminal future states surfaced through `get`.
    Settlement,
}

/// The crate error type.
///
/// Cheap to clone: the message is usually a static string and the source is
/// reference counted. Futures store one of these and hand copies to every
/// waiter.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    source: Option<ErrorSource>,
}

impl Error {
    /// Creates an error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates a `SchedulingFailed` error.
    #[must_use]
    pub fn scheduling_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::SchedulingFailed, message)
    }

    /// Creates an `ExecutionFailed` error wrapping an underlying cause.
    #[must_use]
    pub fn execution_failed(source: ErrorSource) -> Self {
        Self {
            kind: ErrorKind::ExecutionFailed,
            message: Cow::Borrowed("task failed"),
            source: Some(source),
        }
    }

    /// Creates an `ExecutionFailed` error from a caught panic payload.
    ///
    /// Extracts the conventional `&str` / `String` payloads; anything else
    /// is reported as an opaque panic.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        Self {
            kind: ErrorKind::ExecutionFailed,
            message: Cow::Owned(format!("task panicked: {message}")),
            source: None,
        }
    }

    /// Creates a `Cancelled` error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "future cancelled before completion")
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "wait elapsed before the future settled")
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the shared underlying cause, if any.
    #[must_use]
    pub fn source_arc(&self) -> Option<&ErrorSource> {
        self.source.as_ref()
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "opaque panic payload"
    }
}
