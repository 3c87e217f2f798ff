use std::fmt;

/// Lifecycle state of a [`Future`][crate::Future].
///
/// ```text
/// PENDING -> RUNNING -> FINISHED
///    |
///    +-----> CANCELLED -> CANCELLED_AND_NOTIFIED
/// ```
///
/// `FINISHED`, `CANCELLED` and `CANCELLED_AND_NOTIFIED` are terminal with respect to the
/// outcome of the future. The only transition out of `CANCELLED` happens when the runner of the
/// work discovers the cancellation and acknowledges it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum FutureState {
    /// Created but not yet picked up for execution.
    Pending,

    /// The computation is executing.
    Running,

    /// Cancelled before the computation started.
    Cancelled,

    /// Cancelled, and the cancellation has been acknowledged by the runner.
    CancelledAndNotified,

    /// The computation completed with a result or an exception.
    Finished,
}

impl FutureState {
    /// Whether the future has been cancelled (acknowledged or not).
    #[must_use]
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled | Self::CancelledAndNotified)
    }

    /// Whether the outcome of the future can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Cancelled | Self::CancelledAndNotified
        )
    }
}

impl fmt::Display for FutureState {
    #[cfg_attr(test, mutants::skip)] // No API contract for the text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Cancelled => "CANCELLED",
            Self::CancelledAndNotified => "CANCELLED_AND_NOTIFIED",
            Self::Finished => "FINISHED",
        };

        f.write_str(name)
    }
}
