//! Submits a handful of arithmetic computations and prints their outcomes.

use std::time::Duration;

use eventual::{Error, Future, ReturnWhen, WorkItem, submit, wait};

#[derive(Debug, thiserror::Error)]
#[error("{0} cannot be divided by zero")]
struct DivisionByZero(i64);

fn divide(dividend: i64, divisor: i64) -> Result<i64, DivisionByZero> {
    dividend
        .checked_div(divisor)
        .ok_or(DivisionByZero(dividend))
}

fn main() {
    let futures = vec![
        submit(|| divide(4 + 6, 1)),
        submit(|| divide(8_i64.pow(5), 1)),
        submit(|| divide(64 - 45, 1)),
        submit(|| divide(58 * 4, 0)),
    ];

    for future in &futures {
        match future.result(Duration::from_secs(1)) {
            Ok(value) => println!("Future result: {value}"),
            Err(Error::Exception(exception)) => println!("Error in future: {exception}"),
            Err(error) => println!("Future did not complete: {error}"),
        }
    }

    let cancelled = Future::<i64>::new();
    let work = WorkItem::new(cancelled.clone(), || divide(1, 1));
    cancelled.cancel().expect("future lock is never held by this thread");
    work.run().expect("cancelled future is acknowledged exactly once");
    println!("Cancelled future state: {}", cancelled.state());

    let completion = wait(&futures, ReturnWhen::AllCompleted, Duration::from_secs(1))
        .expect("future locks are never held by this thread");
    println!(
        "{} futures done, {} not done",
        completion.done.len(),
        completion.not_done.len()
    );
}
