#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Thread-based concurrency building blocks: a condition variable with explicit acquire/release,
//! a broadcast event and a blocking future that carries the outcome of a unit of work.
//!
//! The crate is layered as follows:
//!
//! * [`Condition`] - a lock (shared or exclusive) combined with a condition variable that can
//!   wake a chosen number of parked waiters.
//! * [`Event`] - a flag that threads can block on until another thread sets it.
//! * [`Future`] - the eventual result of a computation, with cancellation, done-callbacks and
//!   blocking retrieval of the outcome.
//! * [`Waiter`] - collects futures as they complete; [`wait()`] builds "wait for any/all" on it.
//! * [`WorkItem`] - binds a computation to a future and publishes the outcome when run.
//!
//! There is no thread pool here: a work item runs on whichever thread calls
//! [`WorkItem::run()`], and [`submit()`] simply runs it on the calling thread.
//!
//! # Example
//!
//! ```rust
//! use std::thread;
//! use std::time::Duration;
//!
//! use eventual::{Future, WAIT_FOREVER, WorkItem};
//!
//! let future = Future::<i64>::new();
//! future
//!     .add_done_callback(|future| println!("done: {:?}", future.state()))
//!     .unwrap();
//!
//! let work = WorkItem::new(future.clone(), || Ok::<_, std::io::Error>(8_i64.pow(5)));
//! let runner = thread::spawn(move || work.run());
//!
//! assert_eq!(future.result(Duration::from_secs(5)).unwrap(), 32768);
//! runner.join().unwrap().unwrap();
//! ```
//!
//! # Cancellation
//!
//! A future can be cancelled only before its work starts running. The runner discovers the
//! cancellation when it tries to start the work, skips the computation and acknowledges the
//! cancellation to registered waiters:
//!
//! ```rust
//! use eventual::{Error, Future, FutureState, WAIT_FOREVER, WorkItem};
//!
//! let future = Future::<i64>::new();
//! let work = WorkItem::new(future.clone(), || Ok::<_, std::io::Error>(64 - 45));
//!
//! assert!(future.cancel().unwrap());
//! work.run().unwrap();
//!
//! assert_eq!(future.state(), FutureState::CancelledAndNotified);
//! assert!(matches!(future.result(WAIT_FOREVER), Err(Error::Cancelled)));
//! ```
//!
//! # Timeouts
//!
//! Every blocking operation that accepts a timeout treats [`WAIT_FOREVER`] (a zero duration) as
//! "no deadline".

mod condition;
mod error;
mod event;
mod future;
mod future_state;
mod waiter;
mod work_item;

#[cfg(test)]
mod test_utils;

pub use condition::*;
pub use error::*;
pub use event::*;
pub use future::Future;
pub use future_state::*;
pub use waiter::*;
pub use work_item::*;
