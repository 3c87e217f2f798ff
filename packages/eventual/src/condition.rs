//! Lock plus condition variable with explicit acquire/release and counted notification.

use std::any::type_name;
use std::collections::VecDeque;
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

use crate::{Error, Result};

/// Passing this as a timeout means "wait until notified, however long that takes".
pub const WAIT_FOREVER: Duration = Duration::ZERO;

/// How holders of a [`Condition`] share it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum AccessMode {
    /// Any number of parties may hold the condition at the same time.
    Shared,

    /// At most one party may hold the condition at a time.
    Exclusive,
}

#[derive(Debug)]
struct ConditionState {
    // One entry per hold, naming the thread that took it. At most 1 in exclusive mode.
    holders: Vec<ThreadId>,

    // Tickets of parties parked in `wait()` that have not been selected by a notify yet.
    parked: VecDeque<u64>,

    // Tickets selected by a notify whose owners have not woken up yet.
    woken: Vec<u64>,

    next_ticket: u64,
}

impl ConditionState {
    const fn new() -> Self {
        Self {
            holders: Vec::new(),
            parked: VecDeque::new(),
            woken: Vec::new(),
            next_ticket: 0,
        }
    }

    fn is_free_for(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Shared => true,
            AccessMode::Exclusive => self.holders.is_empty(),
        }
    }

    fn is_held_by(&self, thread: ThreadId) -> bool {
        self.holders.contains(&thread)
    }

    fn take(&mut self, thread: ThreadId) {
        self.holders.push(thread);
    }

    /// Gives up one of the holds taken by `thread`.
    fn release_one(&mut self, thread: ThreadId) -> Result<()> {
        let index = self
            .holders
            .iter()
            .position(|holder| *holder == thread)
            .ok_or(Error::NotAcquired)?;

        self.holders.swap_remove(index);
        Ok(())
    }

    fn park(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.parked.push_back(ticket);
        ticket
    }

    /// Consumes the wake-up for `ticket` if a notify has selected it.
    fn take_wakeup(&mut self, ticket: u64) -> bool {
        match self.woken.iter().position(|t| *t == ticket) {
            Some(index) => {
                self.woken.swap_remove(index);
                true
            }
            None => false,
        }
    }

    fn unpark(&mut self, ticket: u64) {
        self.parked.retain(|t| *t != ticket);
    }

    /// Moves up to `n` parked parties (oldest first) into the woken set.
    fn select(&mut self, n: usize) -> usize {
        let count = n.min(self.parked.len());
        self.woken.extend(self.parked.drain(..count));
        count
    }
}

/// A lock combined with a condition variable.
///
/// Unlike [`std::sync::Mutex`], the lock is acquired and released explicitly, which allows
/// a holder to give it up while parked in [`wait()`][Self::wait] and lets any party count and
/// selectively wake parked waiters via [`notify()`][Self::notify].
///
/// Most callers will want [`lock()`][Self::lock], which returns a guard that releases the
/// condition when dropped.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use eventual::{AccessMode, Condition};
///
/// let condition = Condition::new(AccessMode::Exclusive);
///
/// let mut guard = condition.lock().unwrap();
/// assert!(condition.is_locked());
///
/// // Nobody notifies us, so this times out.
/// assert!(!guard.wait(Duration::from_millis(10)).unwrap());
///
/// drop(guard);
/// assert!(!condition.is_locked());
/// ```
pub struct Condition {
    mode: AccessMode,
    state: Mutex<ConditionState>,

    // Signaled whenever a hold is released.
    released: Condvar,

    // Signaled whenever parked parties are selected by a notify.
    notified: Condvar,
}

impl Condition {
    /// Creates a new unlocked condition.
    #[must_use]
    pub const fn new(mode: AccessMode) -> Self {
        Self {
            mode,
            state: Mutex::new(ConditionState::new()),
            released: Condvar::new(),
            notified: Condvar::new(),
        }
    }

    /// The access mode chosen when the condition was created.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Whether any party currently holds the condition.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.state.lock().holders.is_empty()
    }

    /// Number of parties currently parked in [`wait()`][Self::wait] and not yet notified.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.state.lock().parked.len()
    }

    /// Acquires the condition.
    ///
    /// If `blocking` is false, this is a try-lock: the condition is taken and `true` returned
    /// if it is free, otherwise `false` is returned and nothing changes.
    ///
    /// If `blocking` is true, the caller is suspended until the condition can be taken and
    /// `true` is returned. Every successful acquire must be matched by one
    /// [`release()`][Self::release].
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] if `blocking` is true, the condition is exclusive and the
    /// current thread already holds it (acquiring would never return).
    pub fn acquire(&self, blocking: bool) -> Result<bool> {
        let current = thread::current().id();
        let mut state = self.state.lock();

        if !blocking {
            if !state.is_free_for(self.mode) {
                return Ok(false);
            }

            state.take(current);
            return Ok(true);
        }

        if self.mode == AccessMode::Exclusive && state.is_held_by(current) {
            return Err(Error::AlreadyLocked);
        }

        while !state.is_free_for(self.mode) {
            self.released.wait(&mut state);
        }

        state.take(current);
        Ok(true)
    }

    /// Releases one hold that the current thread has on the condition.
    ///
    /// # Errors
    ///
    /// [`Error::NotAcquired`] if the current thread does not hold the condition.
    pub fn release(&self) -> Result<()> {
        self.state.lock().release_one(thread::current().id())?;
        self.released.notify_one();
        Ok(())
    }

    /// Acquires the condition, blocking if necessary, and returns a guard that releases it
    /// when dropped.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] if the condition is exclusive and the current thread
    /// already holds it.
    pub fn lock(&self) -> Result<ConditionGuard<'_>> {
        self.acquire(true)?;
        Ok(ConditionGuard { condition: self })
    }

    /// Gives up the caller's hold on the condition and parks until notified or until
    /// `timeout` elapses, then takes the condition again before returning.
    ///
    /// A `timeout` of [`WAIT_FOREVER`] waits until notified without a deadline.
    ///
    /// Returns `true` if the caller was notified and `false` if the wait timed out. Either
    /// way, the caller holds the condition again on return and must re-check whatever state
    /// it was waiting for.
    ///
    /// # Errors
    ///
    /// [`Error::NotAcquired`] if the current thread does not hold the condition.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        // A deadline too far in the future to represent is the same as no deadline.
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };

        let current = thread::current().id();
        let mut state = self.state.lock();

        // Giving up the hold and parking happen under the same internal lock, so a notify
        // cannot slip in between them.
        state.release_one(current)?;
        let ticket = state.park();
        self.released.notify_one();

        let notified = loop {
            if state.take_wakeup(ticket) {
                break true;
            }

            match deadline {
                None => self.notified.wait(&mut state),
                Some(deadline) => {
                    if self.notified.wait_until(&mut state, deadline).timed_out() {
                        // A notify may have selected us just as the deadline passed.
                        if state.take_wakeup(ticket) {
                            break true;
                        }

                        state.unpark(ticket);
                        break false;
                    }
                }
            }
        };

        while !state.is_free_for(self.mode) {
            self.released.wait(&mut state);
        }

        state.take(current);
        Ok(notified)
    }

    /// Wakes up to `n` parked parties, oldest first.
    ///
    /// # Errors
    ///
    /// [`Error::NoTaskToNotify`] if nobody is parked.
    ///
    /// [`Error::NoMoreTasksLeft`] if fewer than `n` parties were parked. They have all been
    /// woken up regardless.
    pub fn notify(&self, n: usize) -> Result<()> {
        let mut state = self.state.lock();

        let parked = state.parked.len();
        if parked == 0 {
            return Err(Error::NoTaskToNotify);
        }

        let notified = state.select(n);
        drop(state);

        self.notified.notify_all();
        trace!(requested = n, notified, "notified parked waiters");

        if n > notified {
            return Err(Error::NoMoreTasksLeft {
                requested: n,
                notified,
            });
        }

        Ok(())
    }

    /// Wakes all parked parties.
    ///
    /// # Errors
    ///
    /// [`Error::NoTaskToNotify`] if nobody is parked.
    pub fn notify_all(&self) -> Result<()> {
        let mut state = self.state.lock();

        let parked = state.parked.len();
        if parked == 0 {
            return Err(Error::NoTaskToNotify);
        }

        state.select(parked);
        drop(state);

        self.notified.notify_all();
        trace!(notified = parked, "notified all parked waiters");

        Ok(())
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct(type_name::<Self>())
            .field("mode", &self.mode)
            .field("holders", &state.holders.len())
            .field("waiter_count", &state.parked.len())
            .finish_non_exhaustive()
    }
}

/// Holds a [`Condition`] acquired via [`Condition::lock()`] and releases it when dropped.
///
/// Holds belong to the thread that took them, so drop the guard on the thread that created it.
#[derive(Debug)]
pub struct ConditionGuard<'a> {
    condition: &'a Condition,
}

impl ConditionGuard<'_> {
    /// See [`Condition::wait()`].
    ///
    /// # Errors
    ///
    /// Never fails in practice because the guard proves the condition is held; the
    /// [`Error::NotAcquired`] case of [`Condition::wait()`] is passed through.
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        self.condition.wait(timeout)
    }

    /// See [`Condition::notify()`].
    ///
    /// # Errors
    ///
    /// See [`Condition::notify()`].
    pub fn notify(&self, n: usize) -> Result<()> {
        self.condition.notify(n)
    }

    /// See [`Condition::notify_all()`].
    ///
    /// # Errors
    ///
    /// See [`Condition::notify_all()`].
    pub fn notify_all(&self) -> Result<()> {
        self.condition.notify_all()
    }
}

impl Drop for ConditionGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.condition.release() {
            error!(%error, "condition guard failed to release its hold");
        }
    }
}
