//! Retry with backoff for async Rust.
//!
//! Given a Future, we have to run the Future to completion. If the Future returns an error,
//! we retry the Future with a backoff [`strategy`]. Retries stop early when the [`Condition`]
//! rejects the error, or when the caller's cancellation token fires (see
//! [`retry::Retry::with_cancellation`]). Remote calls of the bootstrap path (partition
//! enumeration, partition runtime information) use this with a fixed interval and a fixed number
//! of retries.
//!
//! ```rust
//! use backoff::retry::Retry;
//! use backoff::strategy::fixed;
//!
//! async fn some_work() -> Result<u64, ()> {
//!     Ok(42)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let interval = fixed::Interval::from_millis(1).take(3);
//!     let result = Retry::new(interval, some_work, |_: &()| true).await;
//!     assert_eq!(result, Ok(42));
//! }
//! ```

use std::future::Future;

/// strategy has all the different backoff strategies. It is an iterator with Item=Duration.
/// The strategy decides what duration to return. Since it is an iterator, the number of retries
/// is bounded with [`take`](https://doc.rust-lang.org/std/iter/struct.Take.html).
pub mod strategy;

/// Conditional retry till we run out of backoff or get cancelled.
pub mod retry;

/// The retry condition depends on the result of [`Condition::can_retry`] function.
/// [`Condition::can_retry`] should return `true` to continue retrying or `false` to stop.
pub trait Condition<E> {
    fn can_retry(&self, error: &E) -> bool;
}

/// A fn pointer (Fn) can decide whether to retry based on the error.
impl<E, F> Condition<E> for F
where
    F: Fn(&E) -> bool,
{
    fn can_retry(&self, error: &E) -> bool {
        self(error)
    }
}

/// An `Operation` is anything that returns a Future when executed and that
/// Future can be run to completion.
pub trait Operation {
    type Item;
    type Error;
    /// The [`Future`] returned when the Operation is called.
    type Future: Future<Output = Result<Self::Item, Self::Error>>;

    #[must_use = "futures do nothing unless you `.await` or poll them"]
    fn run(&mut self) -> Self::Future;
}

/// Any [`FnMut`] that returns a [`Future`] whose output is a [`Result`] is an [`Operation`].
impl<T, E, R, F> Operation for F
where
    R: Future<Output = Result<T, E>>,
    F: FnMut() -> R,
{
    type Item = T;
    type Error = E;
    type Future = R;

    fn run(&mut self) -> Self::Future {
        self()
    }
}
