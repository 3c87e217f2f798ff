use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::FutureState;

/// A failure produced by a computation, as stored in a [`Future`][crate::Future].
///
/// Exceptions are reference-counted so that every consumer of a future observes the
/// same failure instance.
pub type Exception = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when operating on the synchronization primitives of this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A blocking acquire was attempted on an exclusive [`Condition`][crate::Condition]
    /// by the thread that already holds it.
    #[error("lock already acquired by the current thread")]
    AlreadyLocked,

    /// The condition was released or waited on without being held.
    #[error("cannot release an un-acquired lock")]
    NotAcquired,

    /// A notification was requested but nobody is parked on the condition.
    #[error("no task to notify")]
    NoTaskToNotify,

    /// More waiters were asked to be notified than were parked. All parked waiters
    /// were still notified.
    #[error("no more tasks left to notify: requested {requested}, notified {notified}")]
    NoMoreTasksLeft {
        /// How many waiters the caller asked to notify.
        requested: usize,

        /// How many waiters were actually notified.
        notified: usize,
    },

    /// A future operation was invoked in a state that its protocol forbids.
    #[error("future in unexpected state: {state}")]
    UnexpectedState {
        /// The state the future was in.
        state: FutureState,
    },

    /// A result or exception was set on a future that already reached a terminal state.
    #[error("cannot set result, future is {state}")]
    InvalidResultState {
        /// The terminal state the future was in.
        state: FutureState,
    },

    /// The outcome of a cancelled future was requested.
    #[error("future was cancelled")]
    Cancelled,

    /// A blocking wait exceeded its deadline.
    #[error("timed out waiting for the future")]
    Timeout,

    /// The computation behind the future failed.
    #[error("computation failed: {0}")]
    Exception(Exception),
}

impl Error {
    /// Whether this error reports a best-effort outcome that callers may ignore.
    ///
    /// Notifying with nobody (or fewer parties than requested) parked is not a failure
    /// of the notifying party.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NoTaskToNotify | Self::NoMoreTasksLeft { .. })
    }
}

/// A specialized `Result` type for this crate, returning the crate's [`Error`] type
/// as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

/// The exception recorded when a computation panics instead of returning.
#[derive(Debug, Error)]
#[error("computation panicked: {message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self { message }
    }

    /// The panic message, if the payload carried one.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
