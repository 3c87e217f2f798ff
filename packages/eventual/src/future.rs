//! The eventual outcome of a unit of work.

use std::any::type_name;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::{
    AccessMode, Condition, ConditionGuard, Error, Exception, FutureState, Panicked, Result,
    WAIT_FOREVER, Waiter,
};

type Outcome<T> = std::result::Result<T, Exception>;

/// Procedure invoked once a future reaches a terminal state.
pub(crate) type DoneCallback<T> = Box<dyn FnOnce(&Future<T>) + Send + 'static>;

pub(crate) struct FutureInner<T> {
    condition: Condition,

    // Only touched while `condition` is held for mutations; point reads take just the mutex.
    core: Mutex<FutureCore<T>>,

    // Set once a `WorkItem` has been bound to this future.
    pub(crate) is_bound: AtomicBool,
}

struct FutureCore<T> {
    state: FutureState,
    outcome: Option<Outcome<T>>,
    callbacks: Vec<DoneCallback<T>>,
    waiters: Vec<Arc<Waiter<T>>>,
}

/// The eventual outcome of a unit of work, shared between the party that runs the work and any
/// number of parties that want to observe the result.
///
/// A future starts out [`FutureState::Pending`]. The runner of the work (typically a
/// [`WorkItem`][crate::WorkItem]) moves it to [`FutureState::Running`] and finally publishes a
/// result or an exception, which makes it [`FutureState::Finished`]. Before the work starts,
/// anyone may [`cancel()`][Self::cancel] the future.
///
/// Cloning a `Future` creates another handle to the same future.
///
/// # Example
///
/// ```rust
/// use std::thread;
/// use std::time::Duration;
///
/// use eventual::Future;
///
/// let future = Future::<i64>::new();
///
/// let producer = thread::spawn({
///     let future = future.clone();
///     move || {
///         future.set_running_or_notify_cancel().unwrap();
///         future.set_result(10).unwrap();
///     }
/// });
///
/// assert_eq!(future.result(Duration::from_secs(5)).unwrap(), 10);
/// producer.join().unwrap();
/// ```
pub struct Future<T = i64> {
    pub(crate) inner: Arc<FutureInner<T>>,
}

impl<T> Future<T>
where
    T: Send + 'static,
{
    /// Creates a new pending future.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                condition: Condition::new(AccessMode::Exclusive),
                core: Mutex::new(FutureCore {
                    state: FutureState::Pending,
                    outcome: None,
                    callbacks: Vec::new(),
                    waiters: Vec::new(),
                }),
                is_bound: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FutureInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<FutureInner<T>> {
        Arc::downgrade(&self.inner)
    }

    /// Whether two handles refer to the same future.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The current state of the future.
    #[must_use]
    pub fn state(&self) -> FutureState {
        self.core().state
    }

    /// Whether the future was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    /// Whether the work behind the future is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == FutureState::Running
    }

    /// Whether the future was cancelled or finished executing.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Attempts to cancel the future.
    ///
    /// Returns `false` if the work is already running or has finished, in which case nothing
    /// changes. Returns `true` if the future is cancelled after the call, whether by this call
    /// or an earlier one.
    ///
    /// Cancelling wakes up everyone blocked on the outcome of the future and invokes the
    /// registered callbacks.
    ///
    /// # Errors
    ///
    /// Returns the error of the future's [`Condition`] if it could not be acquired.
    pub fn cancel(&self) -> Result<bool> {
        let guard = self.lock()?;
        let mut core = self.core();

        match core.state {
            FutureState::Running | FutureState::Finished => return Ok(false),
            FutureState::Cancelled | FutureState::CancelledAndNotified => return Ok(true),
            FutureState::Pending => {}
        }

        core.state = FutureState::Cancelled;
        debug!("future cancelled");

        for waiter in &core.waiters {
            waiter.wake();
        }

        let callbacks = mem::take(&mut core.callbacks);
        drop(core);

        wake_consumers(&guard)?;
        drop(guard);

        self.invoke_callbacks(callbacks);
        Ok(true)
    }

    /// Marks the future as running or, if it was cancelled, acknowledges the cancellation.
    ///
    /// The runner of the work calls this immediately before executing the work. If this returns
    /// `false`, the future was cancelled and the work must not be executed. The acknowledgment
    /// moves the future to [`FutureState::CancelledAndNotified`] and records it as completed
    /// with every registered [`Waiter`].
    ///
    /// # Errors
    ///
    /// [`Error::UnexpectedState`] if the future is neither pending nor cancelled, which means
    /// the work was already started once.
    pub fn set_running_or_notify_cancel(&self) -> Result<bool> {
        let _guard = self.lock()?;
        let mut core = self.core();

        match core.state {
            FutureState::Cancelled => {
                core.state = FutureState::CancelledAndNotified;
                debug!("cancellation acknowledged by runner");

                for waiter in &core.waiters {
                    waiter.add_future(self);
                }

                Ok(false)
            }
            FutureState::Pending => {
                core.state = FutureState::Running;
                trace!("future running");
                Ok(true)
            }
            state => {
                error!(%state, "future in unexpected state when starting to run");
                Err(Error::UnexpectedState { state })
            }
        }
    }

    /// Publishes the result of the work, finishing the future.
    ///
    /// Everyone blocked on the outcome is woken up, every registered [`Waiter`] records the
    /// future as completed and then the registered callbacks are invoked in registration order.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidResultState`] if the future was cancelled or already finished. The
    /// existing outcome is left untouched.
    pub fn set_result(&self, value: T) -> Result<()> {
        self.complete(Ok(value))
    }

    /// Publishes the failure of the work, finishing the future.
    ///
    /// Behaves like [`set_result()`][Self::set_result] except that consumers observe the
    /// exception instead of a value.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidResultState`] if the future was cancelled or already finished. The
    /// existing outcome is left untouched.
    pub fn set_exception<E>(&self, exception: E) -> Result<()>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.complete(Err(Arc::new(exception)))
    }

    fn complete(&self, outcome: Outcome<T>) -> Result<()> {
        let guard = self.lock()?;
        let mut core = self.core();

        if core.state.is_terminal() {
            let state = core.state;
            warn!(%state, "attempted to set the outcome of a completed future");
            return Err(Error::InvalidResultState { state });
        }

        let succeeded = outcome.is_ok();
        core.outcome = Some(outcome);
        core.state = FutureState::Finished;
        debug!(succeeded, "future finished");

        for waiter in &core.waiters {
            waiter.add_future(self);
        }

        let callbacks = mem::take(&mut core.callbacks);
        drop(core);

        wake_consumers(&guard)?;
        drop(guard);

        self.invoke_callbacks(callbacks);
        Ok(())
    }

    /// Registers a callback to invoke once the future is cancelled or finished.
    ///
    /// Callbacks run in registration order, after the future's lock has been released, so
    /// they are free to inspect the future they receive. If the future is already done, the
    /// callback is invoked immediately on the calling thread.
    ///
    /// A panicking callback is logged and does not prevent later callbacks from running.
    ///
    /// # Errors
    ///
    /// Returns the error of the future's [`Condition`] if it could not be acquired.
    pub fn add_done_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let guard = self.lock()?;
        let mut core = self.core();

        if !core.state.is_terminal() {
            core.callbacks.push(Box::new(callback));
            return Ok(());
        }

        drop(core);
        drop(guard);

        let callback: DoneCallback<T> = Box::new(callback);
        self.invoke_callbacks(vec![callback]);
        Ok(())
    }

    /// Registers interest of `waiter` in the completion of this future.
    ///
    /// Register a waiter at most once per future; repeated registration leads to duplicate
    /// entries in the waiter's list of completed futures.
    ///
    /// # Errors
    ///
    /// Returns the error of the future's [`Condition`] if it could not be acquired.
    pub fn add_waiter(&self, waiter: &Arc<Waiter<T>>) -> Result<()> {
        let _guard = self.lock()?;
        self.core().waiters.push(Arc::clone(waiter));
        Ok(())
    }

    /// Removes a registration made via [`add_waiter()`][Self::add_waiter].
    ///
    /// # Errors
    ///
    /// Returns the error of the future's [`Condition`] if it could not be acquired.
    pub fn remove_waiter(&self, waiter: &Arc<Waiter<T>>) -> Result<()> {
        let _guard = self.lock()?;
        let mut core = self.core();

        if let Some(index) = core.waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            core.waiters.remove(index);
        }

        Ok(())
    }

    /// Returns the exception of the work, waiting up to `timeout` for the future to complete.
    ///
    /// A `timeout` of [`WAIT_FOREVER`] waits without a deadline. Returns `None` if the work
    /// succeeded.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if the future was cancelled.
    ///
    /// [`Error::Timeout`] if the future did not complete in time.
    pub fn exception(&self, timeout: Duration) -> Result<Option<Exception>> {
        self.wait_for_outcome(timeout, |outcome| match outcome {
            Ok(_) => None,
            Err(exception) => Some(Arc::clone(exception)),
        })
    }

    /// Whether the future finished with an exception.
    pub(crate) fn has_exception(&self) -> bool {
        matches!(self.core().outcome, Some(Err(_)))
    }

    fn wait_for_outcome<R>(
        &self,
        timeout: Duration,
        read: impl FnOnce(&Outcome<T>) -> R,
    ) -> Result<R> {
        // A deadline too far in the future to represent is the same as no deadline.
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };

        let mut guard = self.lock()?;

        loop {
            if self.core().state.is_terminal() {
                break;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());

                    // A zero remainder would mean "forever" to the condition.
                    if remaining.is_zero() {
                        break;
                    }

                    remaining
                }
                None => WAIT_FOREVER,
            };

            if !guard.wait(remaining)? {
                break;
            }
        }

        let core = self.core();

        match (&core.state, &core.outcome) {
            (state, _) if state.is_cancelled() => Err(Error::Cancelled),
            (FutureState::Finished, Some(outcome)) => Ok(read(outcome)),
            _ => Err(Error::Timeout),
        }
    }

    fn invoke_callbacks(&self, callbacks: Vec<DoneCallback<T>>) {
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
                let panicked = Panicked::from_payload(payload.as_ref());
                error!(
                    panic_message = panicked.message(),
                    "future done callback panicked"
                );
            }
        }
    }

    fn lock(&self) -> Result<ConditionGuard<'_>> {
        self.inner.condition.lock()
    }

    fn core(&self) -> MutexGuard<'_, FutureCore<T>> {
        self.inner.core.lock()
    }

    #[cfg(test)]
    pub(crate) fn parked_consumers(&self) -> usize {
        self.inner.condition.waiter_count()
    }
}

impl<T> Future<T>
where
    T: Clone + Send + 'static,
{
    /// Returns the result of the work, waiting up to `timeout` for the future to complete.
    ///
    /// A `timeout` of [`WAIT_FOREVER`] waits without a deadline.
    ///
    /// # Errors
    ///
    /// [`Error::Exception`] if the work failed.
    ///
    /// [`Error::Cancelled`] if the future was cancelled.
    ///
    /// [`Error::Timeout`] if the future did not complete in time.
    pub fn result(&self, timeout: Duration) -> Result<T> {
        self.wait_for_outcome(timeout, |outcome| match outcome {
            Ok(value) => Ok(value.clone()),
            Err(exception) => Err(Error::Exception(Arc::clone(exception))),
        })?
    }
}

fn wake_consumers(guard: &ConditionGuard<'_>) -> Result<()> {
    match guard.notify_all() {
        Ok(()) | Err(Error::NoTaskToNotify) => Ok(()),
        Err(error) => Err(error),
    }
}

impl<T> Default for Future<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();

        f.debug_struct(type_name::<Self>())
            .field("state", &core.state)
            .field("callbacks", &core.callbacks.len())
            .field("waiters", &core.waiters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use static_assertions::assert_impl_all;
    use testing::{wait_until, with_watchdog};

    use super::*;

    assert_impl_all!(Future<i64>: Send, Sync, Clone);
    assert_impl_all!(Future<String>: Send, Sync, Clone);

    #[derive(Debug, thiserror::Error)]
    #[error("division by zero")]
    struct DivisionByZero;

    fn wait_for_consumers(future: &Future<i64>, count: usize) {
        wait_until(|| future.parked_consumers() >= count);
    }

    #[test]
    fn starts_pending() {
        let future = Future::<i64>::new();

        assert_eq!(future.state(), FutureState::Pending);
        assert!(!future.is_running());
        assert!(!future.is_done());
        assert!(!future.is_cancelled());
    }

    #[test]
    fn runs_and_finishes_with_result() {
        let future = Future::<i64>::new();

        assert!(future.set_running_or_notify_cancel().unwrap());
        assert!(future.is_running());

        future.set_result(10).unwrap();
        assert_eq!(future.state(), FutureState::Finished);
        assert!(future.is_done());
        assert_eq!(future.result(WAIT_FOREVER).unwrap(), 10);
        assert!(future.exception(WAIT_FOREVER).unwrap().is_none());
    }

    #[test]
    fn finishes_with_exception() {
        let future = Future::<i64>::new();

        future.set_running_or_notify_cancel().unwrap();
        future.set_exception(DivisionByZero).unwrap();

        let exception = future.exception(WAIT_FOREVER).unwrap().unwrap();
        assert_eq!(exception.to_string(), "division by zero");

        match future.result(WAIT_FOREVER) {
            Err(Error::Exception(exception)) => {
                assert_eq!(exception.to_string(), "division by zero");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn second_outcome_is_rejected() {
        let future = Future::<i64>::new();
        future.set_running_or_notify_cancel().unwrap();
        future.set_result(1).unwrap();

        assert!(matches!(
            future.set_result(2),
            Err(Error::InvalidResultState {
                state: FutureState::Finished
            })
        ));
        assert!(matches!(
            future.set_exception(DivisionByZero),
            Err(Error::InvalidResultState {
                state: FutureState::Finished
            })
        ));

        assert_eq!(future.result(WAIT_FOREVER).unwrap(), 1);
    }

    #[test]
    fn exception_then_result_is_rejected() {
        let future = Future::<i64>::new();
        future.set_exception(DivisionByZero).unwrap();

        assert!(matches!(
            future.set_result(2),
            Err(Error::InvalidResultState { .. })
        ));
        assert!(future.exception(WAIT_FOREVER).unwrap().is_some());
    }

    #[test]
    fn cancel_pending_future() {
        let future = Future::<i64>::new();

        assert!(future.cancel().unwrap());
        assert_eq!(future.state(), FutureState::Cancelled);
        assert!(future.is_cancelled());
        assert!(future.is_done());

        // Cancelling again is a no-op that still reports success.
        assert!(future.cancel().unwrap());

        assert!(matches!(
            future.result(WAIT_FOREVER),
            Err(Error::Cancelled)
        ));
        assert!(matches!(
            future.exception(WAIT_FOREVER),
            Err(Error::Cancelled)
        ));
        assert!(matches!(
            future.set_result(1),
            Err(Error::InvalidResultState {
                state: FutureState::Cancelled
            })
        ));
    }

    #[test]
    fn cancel_refused_once_running_or_finished() {
        let future = Future::<i64>::new();
        future.set_running_or_notify_cancel().unwrap();

        assert!(!future.cancel().unwrap());
        assert_eq!(future.state(), FutureState::Running);

        future.set_result(5).unwrap();

        assert!(!future.cancel().unwrap());
        assert_eq!(future.state(), FutureState::Finished);
        assert_eq!(future.result(WAIT_FOREVER).unwrap(), 5);
    }

    #[test]
    fn runner_acknowledges_cancellation() {
        let future = Future::<i64>::new();
        future.cancel().unwrap();

        assert!(!future.set_running_or_notify_cancel().unwrap());
        assert_eq!(future.state(), FutureState::CancelledAndNotified);
        assert!(future.is_cancelled());

        // Terminal: nothing moves it any more.
        assert!(future.cancel().unwrap());
        assert!(matches!(
            future.set_running_or_notify_cancel(),
            Err(Error::UnexpectedState {
                state: FutureState::CancelledAndNotified
            })
        ));
        assert_eq!(future.state(), FutureState::CancelledAndNotified);
    }

    #[test]
    fn running_twice_is_unexpected() {
        let future = Future::<i64>::new();
        future.set_running_or_notify_cancel().unwrap();

        assert!(matches!(
            future.set_running_or_notify_cancel(),
            Err(Error::UnexpectedState {
                state: FutureState::Running
            })
        ));

        future.set_result(3).unwrap();
        assert!(matches!(
            future.set_running_or_notify_cancel(),
            Err(Error::UnexpectedState {
                state: FutureState::Finished
            })
        ));
    }

    #[test]
    fn result_times_out_when_never_completed() {
        let future = Future::<i64>::new();

        assert!(matches!(
            future.result(Duration::from_millis(50)),
            Err(Error::Timeout)
        ));
        assert_eq!(future.state(), FutureState::Pending);

        future.set_running_or_notify_cancel().unwrap();
        assert!(matches!(
            future.exception(Duration::from_millis(50)),
            Err(Error::Timeout)
        ));
        assert_eq!(future.state(), FutureState::Running);
    }

    #[test]
    fn callbacks_run_once_in_registration_order() {
        let future = Future::<i64>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = Arc::clone(&order);
            future
                .add_done_callback(move |_| order.lock().push(id))
                .unwrap();
        }

        assert!(order.lock().is_empty());

        future.set_running_or_notify_cancel().unwrap();
        future.set_result(1).unwrap();

        assert_eq!(*order.lock(), vec![0, 1, 2]);

        // A failed second completion does not invoke them again.
        drop(future.set_result(2));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn callback_after_completion_runs_immediately() {
        let future = Future::<i64>::new();
        future.set_result(4).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        future
            .add_done_callback({
                let calls = Arc::clone(&calls);
                move |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn callback_may_read_the_future() {
        let future = Future::<i64>::new();
        let seen = Arc::new(Mutex::new(None));

        future
            .add_done_callback({
                let seen = Arc::clone(&seen);
                move |future| {
                    *seen.lock() = Some(future.result(WAIT_FOREVER).unwrap());
                }
            })
            .unwrap();

        future.set_result(42).unwrap();
        assert_eq!(*seen.lock(), Some(42));
    }

    #[test]
    fn cancel_invokes_callbacks() {
        let future = Future::<i64>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        future
            .add_done_callback({
                let calls = Arc::clone(&calls);
                move |future| {
                    assert!(future.is_cancelled());
                    calls.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();

        future.cancel().unwrap();
        future.cancel().unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_callback_does_not_stop_others() {
        let future = Future::<i64>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        future
            .add_done_callback(|_| panic!("callback failure"))
            .unwrap();
        future
            .add_done_callback({
                let calls = Arc::clone(&calls);
                move |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();

        future.set_result(1).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn terminal_transitions_notify_waiters() {
        let finished = Future::<i64>::new();
        let cancelled = Future::<i64>::new();
        let waiter = Arc::new(Waiter::new());

        finished.add_waiter(&waiter).unwrap();
        cancelled.add_waiter(&waiter).unwrap();

        finished.set_result(1).unwrap();

        // Cancelling alone does not record completion; the runner's acknowledgment does.
        cancelled.cancel().unwrap();
        assert_eq!(waiter.len(), 1);

        cancelled.set_running_or_notify_cancel().unwrap();
        assert_eq!(waiter.len(), 2);

        let completed = waiter.finished_futures();
        assert!(completed[0].ptr_eq(&finished));
        assert!(completed[1].ptr_eq(&cancelled));
    }

    #[test]
    fn removed_waiter_is_not_notified() {
        let future = Future::<i64>::new();
        let waiter = Arc::new(Waiter::new());

        future.add_waiter(&waiter).unwrap();
        future.remove_waiter(&waiter).unwrap();
        future.set_result(1).unwrap();

        assert!(waiter.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let future = Future::<i64>::new();
        let clone = future.clone();

        assert!(future.ptr_eq(&clone));
        assert!(!future.ptr_eq(&Future::new()));

        clone.set_result(8).unwrap();
        assert_eq!(future.result(WAIT_FOREVER).unwrap(), 8);
    }

    #[test]
    fn generic_payload() {
        let future = Future::<String>::new();
        future.set_result("done".to_string()).unwrap();

        assert_eq!(future.result(WAIT_FOREVER).unwrap(), "done");
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn blocked_consumer_receives_result() {
        with_watchdog(|| {
            let future = Future::<i64>::new();

            let consumer = thread::spawn({
                let future = future.clone();
                move || future.result(WAIT_FOREVER)
            });

            wait_for_consumers(&future, 1);

            future.set_running_or_notify_cancel().unwrap();
            future.set_result(10).unwrap();

            assert_eq!(consumer.join().unwrap().unwrap(), 10);
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn blocked_consumers_observe_cancellation() {
        with_watchdog(|| {
            let future = Future::<i64>::new();

            let consumers: Vec<_> = (0..3)
                .map(|_| {
                    let future = future.clone();
                    thread::spawn(move || future.result(Duration::from_secs(5)))
                })
                .collect();

            wait_for_consumers(&future, 3);
            assert!(future.cancel().unwrap());

            for consumer in consumers {
                assert!(matches!(consumer.join().unwrap(), Err(Error::Cancelled)));
            }
        });
    }
}
