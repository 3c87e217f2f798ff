//! Broadcast boolean flag that threads can block on.

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{AccessMode, Condition, Error, Result, WAIT_FOREVER};

/// A flag that threads can wait on until another thread sets it.
///
/// Setting the event wakes every thread blocked in [`wait()`][Self::wait]. The event stays
/// set (and further waits return immediately) until it is [`clear()`][Self::clear]ed.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use eventual::Event;
///
/// let event = Arc::new(Event::new());
///
/// let setter = thread::spawn({
///     let event = Arc::clone(&event);
///     move || event.set().unwrap()
/// });
///
/// event.wait().unwrap();
/// assert!(event.is_set());
///
/// setter.join().unwrap();
/// ```
pub struct Event {
    condition: Condition,

    // Only modified while `condition` is held, which orders it with respect to waiters.
    flag: AtomicBool,
}

impl Event {
    /// Creates a new event that is not set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            condition: Condition::new(AccessMode::Exclusive),
            flag: AtomicBool::new(false),
        }
    }

    /// Whether the event is set.
    ///
    /// This is a point-in-time reading for advisory use. To block until the event is set,
    /// use [`wait()`][Self::wait].
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sets the event, waking up every thread waiting for it.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Condition`] if it could not be acquired.
    pub fn set(&self) -> Result<()> {
        let guard = self.condition.lock()?;
        self.flag.store(true, Ordering::Release);

        match guard.notify_all() {
            Ok(()) => Ok(()),
            Err(Error::NoTaskToNotify) => {
                trace!("event set with nobody waiting");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Resets the event so that subsequent waits block again.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Condition`] if it could not be acquired.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.condition.lock()?;
        self.flag.store(false, Ordering::Release);
        Ok(())
    }

    /// Blocks until the event is set.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Condition`] if waiting on it failed.
    pub fn wait(&self) -> Result<()> {
        let mut guard = self.condition.lock()?;

        while !self.flag.load(Ordering::Acquire) {
            guard.wait(WAIT_FOREVER)?;
        }

        Ok(())
    }

    /// Blocks until the event is set or `timeout` elapses.
    ///
    /// A `timeout` of [`WAIT_FOREVER`] behaves like [`wait()`][Self::wait].
    ///
    /// Returns whether the event was set when the wait ended.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying [`Condition`] if waiting on it failed.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool> {
        if timeout.is_zero() {
            return self.wait().map(|()| true);
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.condition.lock()?;

        loop {
            if self.flag.load(Ordering::Acquire) {
                return Ok(true);
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => WAIT_FOREVER,
            };

            // A zero remainder would mean "forever" to the condition.
            if deadline.is_some() && remaining.is_zero() {
                return Ok(false);
            }

            if !guard.wait(remaining)? {
                return Ok(self.flag.load(Ordering::Acquire));
            }
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("flag", &self.flag.load(Ordering::Relaxed))
            .field("condition", &self.condition)
            .finish()
    }
}
