//! Aggregation of completions across many futures.

use std::any::type_name;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::future::FutureInner;
use crate::{Event, Future, Result, WAIT_FOREVER};

/// Collects futures as they complete.
///
/// Register a waiter with any number of futures via [`Future::add_waiter()`]. Each of them
/// records itself with the waiter when it finishes or when its cancellation is acknowledged,
/// and signals the waiter so that a thread blocked in [`wait()`][Self::wait] wakes up.
///
/// The waiter does not keep the futures alive; futures dropped by everyone else are omitted
/// from [`finished_futures()`][Self::finished_futures].
///
/// For the common "wait for any/all of these" pattern, see [`wait()`][crate::wait].
pub struct Waiter<T> {
    event: Event,

    // Guarded separately from the futures so that many of them can complete concurrently.
    finished: Mutex<Vec<Weak<FutureInner<T>>>>,
}

impl<T> Waiter<T>
where
    T: Send + 'static,
{
    /// Creates a waiter that has not seen any completions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            event: Event::new(),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Records `future` as completed and wakes up anyone waiting on this waiter.
    ///
    /// Futures call this on their own when they reach a terminal state. There is no
    /// deduplication.
    pub fn add_future(&self, future: &Future<T>) {
        self.finished.lock().push(future.downgrade());
        trace!("waiter recorded a completed future");
        self.wake();
    }

    /// Wakes up anyone waiting on this waiter without recording a completion.
    pub(crate) fn wake(&self) {
        if let Err(error) = self.event.set() {
            warn!(%error, "failed to signal waiter");
        }
    }

    /// Blocks until the waiter is signaled, which happens when a completion is recorded or
    /// when a registered future is cancelled. Signals raised before the last
    /// [`reset()`][Self::reset] do not count.
    ///
    /// A cancellation signals the waiter before it is recorded: the future only shows up in
    /// [`finished_futures()`][Self::finished_futures] once the runner of its work acknowledges
    /// the cancellation. Check the state of the futures of interest after waking up.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Event`] if waiting on it failed.
    pub fn wait(&self) -> Result<()> {
        self.event.wait()
    }

    /// Like [`wait()`][Self::wait] but gives up after `timeout`.
    ///
    /// Returns whether a completion was signaled.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Event`] if waiting on it failed.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        self.event.wait_for(timeout)
    }

    /// Re-arms the waiter so that the next [`wait()`][Self::wait] blocks until a new
    /// completion arrives. Completions recorded so far are kept.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Event`] if it could not be cleared.
    pub fn reset(&self) -> Result<()> {
        self.event.clear()
    }

    /// The completed futures recorded so far, in completion order.
    #[must_use]
    pub fn finished_futures(&self) -> Vec<Future<T>> {
        self.finished
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Future::from_inner)
            .collect()
    }

    /// Number of recorded completions of futures that are still alive, i.e. the length of
    /// [`finished_futures()`][Self::finished_futures].
    #[must_use]
    pub fn len(&self) -> usize {
        self.finished
            .lock()
            .iter()
            .filter(|future| future.strong_count() > 0)
            .count()
    }

    /// Whether [`finished_futures()`][Self::finished_futures] would return nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Waiter<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("event", &self.event)
            .field(
                "finished",
                &self
                    .finished
                    .lock()
                    .iter()
                    .filter(|future| future.strong_count() > 0)
                    .count(),
            )
            .finish()
    }
}

/// When [`wait()`][crate::wait] returns.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ReturnWhen {
    /// As soon as any future is done.
    FirstCompleted,

    /// As soon as any future finishes with an exception, or when all are done.
    FirstException,

    /// When all futures are done.
    AllCompleted,
}

/// The futures given to [`wait()`][crate::wait], split by whether they were done when it
/// returned.
#[derive(Debug)]
#[non_exhaustive]
pub struct Completion<T> {
    /// Futures that were cancelled or finished.
    pub done: Vec<Future<T>>,

    /// Futures that were still pending or running.
    pub not_done: Vec<Future<T>>,
}

/// Blocks until the given futures satisfy `return_when` or until `timeout` elapses.
///
/// A `timeout` of [`WAIT_FOREVER`] waits without a deadline. Running into the timeout is not an
/// error; inspect [`Completion::not_done`] to see which futures did not complete.
///
/// # Errors
///
/// Returns the error of a future's [`Condition`][crate::Condition] if it could not be acquired.
///
/// # Example
///
/// ```rust
/// use eventual::{ReturnWhen, WAIT_FOREVER, submit, wait};
///
/// let futures = vec![
///     submit(|| Ok::<i64, std::io::Error>(4 + 6)),
///     submit(|| Ok::<i64, std::io::Error>(64 - 45)),
/// ];
///
/// let completion = wait(&futures, ReturnWhen::AllCompleted, WAIT_FOREVER).unwrap();
/// assert_eq!(completion.done.len(), 2);
/// assert!(completion.not_done.is_empty());
/// ```
pub fn wait<T>(
    futures: &[Future<T>],
    return_when: ReturnWhen,
    timeout: Duration,
) -> Result<Completion<T>>
where
    T: Send + 'static,
{
    // A deadline too far in the future to represent is the same as no deadline.
    let deadline = if timeout.is_zero() {
        None
    } else {
        Instant::now().checked_add(timeout)
    };

    let waiter = Arc::new(Waiter::new());

    for future in futures {
        future.add_waiter(&waiter)?;
    }

    let outcome = wait_until_satisfied(futures, return_when, deadline, &waiter);

    for future in futures {
        future.remove_waiter(&waiter)?;
    }

    outcome?;

    let (done, not_done) = futures.iter().cloned().partition(Future::is_done);
    Ok(Completion { done, not_done })
}

fn wait_until_satisfied<T>(
    futures: &[Future<T>],
    return_when: ReturnWhen,
    deadline: Option<Instant>,
    waiter: &Waiter<T>,
) -> Result<()>
where
    T: Send + 'static,
{
    loop {
        // Re-arm before inspecting so that a completion racing with the inspection is
        // not lost.
        waiter.reset()?;

        if is_satisfied(futures, return_when) {
            return Ok(());
        }

        let remaining = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());

                // A zero remainder would mean "forever" to the event.
                if remaining.is_zero() {
                    return Ok(());
                }

                remaining
            }
            None => WAIT_FOREVER,
        };

        if !waiter.wait_for(remaining)? {
            return Ok(());
        }
    }
}

fn is_satisfied<T>(futures: &[Future<T>], return_when: ReturnWhen) -> bool
where
    T: Send + 'static,
{
    let all_done = futures.iter().all(Future::is_done);

    match return_when {
        ReturnWhen::FirstCompleted => futures.is_empty() || futures.iter().any(Future::is_done),
        ReturnWhen::FirstException => all_done || futures.iter().any(Future::has_exception),
        ReturnWhen::AllCompleted => all_done,
    }
}
