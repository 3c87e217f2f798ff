//! Binding of a computation to the future that publishes its outcome.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use tracing::{debug, error};

use crate::{Future, Panicked, Result};

/// A computation bound to the [`Future`] that will carry its outcome.
///
/// [`run()`][Self::run] executes the computation on the calling thread, unless the future was
/// cancelled first. Whatever the computation returns (or a [`Panicked`] exception if it panics)
/// is published into the future.
///
/// At most one work item can ever be bound to a given future.
///
/// # Example
///
/// ```rust
/// use eventual::{Future, WAIT_FOREVER, WorkItem};
///
/// let future = Future::<i64>::new();
/// let work = WorkItem::new(future.clone(), || Ok::<_, std::io::Error>(58 * 4));
///
/// work.run().unwrap();
/// assert_eq!(future.result(WAIT_FOREVER).unwrap(), 232);
/// ```
pub struct WorkItem<T, F> {
    future: Future<T>,
    work: F,
}

impl<T, E, F> WorkItem<T, F>
where
    T: Send + 'static,
    E: StdError + Send + Sync + 'static,
    F: FnOnce() -> std::result::Result<T, E>,
{
    /// Binds `work` to `future`.
    ///
    /// # Panics
    ///
    /// Panics if a work item has already been bound to the future.
    pub fn new(future: Future<T>, work: F) -> Self {
        Self::new_checked(future, work)
            .expect("a work item has already been bound to this future")
    }

    /// Binds `work` to `future`.
    ///
    /// Returns [`None`] if a work item has already been bound to the future.
    pub fn new_checked(future: Future<T>, work: F) -> Option<Self> {
        if future.inner.is_bound.swap(true, Ordering::AcqRel) {
            return None;
        }

        Some(Self { future, work })
    }

    /// The future that receives the outcome of the computation.
    #[must_use]
    pub fn future(&self) -> &Future<T> {
        &self.future
    }

    /// Executes the computation and publishes its outcome, unless the future was cancelled.
    ///
    /// A cancelled future has its cancellation acknowledged instead and the computation is
    /// dropped without being executed.
    ///
    /// # Errors
    ///
    /// Returns the error of the future's state machine if the future was driven by someone
    /// other than this work item, e.g. [`Error::UnexpectedState`][crate::Error::UnexpectedState]
    /// if it was already marked as running.
    pub fn run(self) -> Result<()> {
        let Self { future, work } = self;

        if !future.set_running_or_notify_cancel()? {
            debug!("work item skipped because its future was cancelled");
            return Ok(());
        }

        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(value)) => future.set_result(value),
            Ok(Err(exception)) => future.set_exception(exception),
            Err(payload) => {
                let panicked = Panicked::from_payload(payload.as_ref());
                error!(panic_message = panicked.message(), "work item panicked");
                future.set_exception(panicked)
            }
        }
    }
}

impl<T, F> fmt::Debug for WorkItem<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("future", &self.future)
            .finish_non_exhaustive()
    }
}

/// Executes `work` on the calling thread and returns the completed [`Future`] holding its
/// outcome.
///
/// # Example
///
/// ```rust
/// use eventual::{WAIT_FOREVER, submit};
///
/// let future = submit(|| Ok::<i64, std::io::Error>(4 + 6));
///
/// assert!(future.is_done());
/// assert_eq!(future.result(WAIT_FOREVER).unwrap(), 10);
/// ```
pub fn submit<T, E, F>(work: F) -> Future<T>
where
    T: Send + 'static,
    E: StdError + Send + Sync + 'static,
    F: FnOnce() -> std::result::Result<T, E>,
{
    let future = Future::new();

    // A fresh future is only ever driven by this work item, so this cannot fail.
    if let Err(error) = WorkItem::new(future.clone(), work).run() {
        error!(%error, "submitted work item failed to publish its outcome");
    }

    future
}
