//! Error types and the result channel for asupertask.
//!
//! Every task outcome is a [`Result`]: exactly one of `Ok(value)` or
//! `Err(Error)`. Composition short-circuits on `Err` and forwards it
//! unchanged until an explicit recovery combinator intercepts it.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Panics raised by user code are captured and converted to [`ErrorKind::Panicked`]
//! - Interruption and timeouts are distinguished kinds, not domain failures
//! - Errors are classified by recoverability for retry logic
//!
//! # Recovery Classification
//!
//! All errors can be classified by [`Recoverability`]:
//! - `Transient`: Temporary failure, safe to retry
//! - `Permanent`: Unrecoverable, do not retry
//! - `Unknown`: Recoverability depends on context

use core::fmt;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::types::CancelReason;

/// Result channel used by every task: `Ok` is success, `Err` is failure.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Domain failure raised by user code.
    User,
    /// A panic raised by user code, captured at a composition step.
    Panicked,
    /// A time-bounded operation did not complete in time.
    Timeout,
    /// The computation was cancelled before it completed.
    Interrupted,
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the recoverability classification for this error kind.
    ///
    /// This helps retry logic decide whether to attempt recovery.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::Timeout => Recoverability::Transient,
            Self::Interrupted | Self::Internal => Recoverability::Permanent,
            Self::User | Self::Panicked => Recoverability::Unknown,
        }
    }

    /// Returns the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Panicked => "panicked",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error kind alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// The failure cause carried by the `Err` branch of every task result.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    reason: Option<CancelReason>,
    history: Option<Arc<[Error]>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            reason: None,
            history: None,
        }
    }

    /// Creates a domain failure with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(message)
    }

    /// Wraps an arbitrary error value as a domain failure.
    #[must_use]
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// Creates an interruption failure from a structured reason.
    #[must_use]
    pub fn interrupted(reason: CancelReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(ErrorKind::Interrupted)
        }
    }

    /// Creates a timeout failure for the given bound.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout).with_message(format!("timed out after {after:?}"))
    }

    /// Converts a caught panic payload into a failure.
    #[must_use]
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        Self::new(ErrorKind::Panicked).with_message(message)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the cancellation reason for interruption failures.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        self.reason.as_ref()
    }

    /// Failures seen by earlier retry attempts, oldest first.
    ///
    /// Empty unless this error was returned by an accumulating retry that
    /// gave up after at least one retried failure.
    #[must_use]
    pub fn retry_history(&self) -> &[Self] {
        self.history.as_deref().unwrap_or(&[])
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// Returns true if this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Default retriable predicate: any failure that is not permanent.
    ///
    /// Interruption and internal runtime errors are never recoverable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !self.recoverability().is_permanent()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub(crate) fn with_retry_history(mut self, history: Vec<Self>) -> Self {
        if !history.is_empty() {
            self.history = Some(history.into());
        }
        self
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("kind", &self.kind);
        if let Some(message) = &self.message {
            s.field("message", message);
        }
        if let Some(reason) = &self.reason {
            s.field("reason", reason);
        }
        if let Some(source) = &self.source {
            s.field("source", &format_args!("{source}"));
        }
        if let Some(history) = &self.history {
            s.field("history_len", &history.len());
        }
        s.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<CancelReason> for Error {
    fn from(reason: CancelReason) -> Self {
        Self::interrupted(reason)
    }
}

/// Extension trait for adding context to results.
pub trait ResultExt<T> {
    /// Attach a static message if this is an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }
}

/// Runs `f`, converting a panic into an `Err(Panicked)`.
pub(crate) fn catch<T>(f: impl FnOnce() -> T) -> Result<T> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|p| Error::panicked(&*p))
}
