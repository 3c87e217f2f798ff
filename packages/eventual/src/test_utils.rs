//! Testing utilities shared by the unit tests of this crate.

use testing::wait_until;

use crate::Condition;

/// Blocks until at least `count` parties are parked on `condition`.
pub(crate) fn wait_for_parked(condition: &Condition, count: usize) {
    wait_until(|| condition.waiter_count() >= count);
}
