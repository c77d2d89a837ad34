use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::{Condition, Operation};

/// To retry a Future with backoff, we maintain 2 states (which are Futures themselves).
/// These states track whether the [`Operation`] is [`RetryState::Running`] or cooling off via
/// [`RetryState::Sleeping`] as prescribed by the [`crate::strategy`]. The state-machine for retry
/// flips between these two states:
/// ```no_rust
///      (Pending)
///     /
/// (op)            (Ok) -> [Return(Ok)]*
///    \           /
///     (Ready) ---       (Non-retryable) -> [Return(Err)]*
///                \     /
///                 (Err)                            (None) -> [Return(Err)]*
///                      \                          /
///                       (Retryable) ---> (Backoff)          (Pending)
///                                                \        /
///                                                  (Sleep)
///                                                        \
///                                                         (Ready) --> [START(op)]
/// ```
/// A cancelled token short-circuits either state with the error built by the cancel hook.
#[pin_project(project = RetryStateProj)]
enum RetryState<O>
where
    O: Operation,
{
    Running(#[pin] O::Future),
    Sleeping(#[pin] Sleep),
}

/// Cancellation hook, the token's future and how to turn a cancellation into the operation's error.
#[pin_project]
struct Cancellation<E> {
    #[pin]
    cancelled: WaitForCancellationFutureOwned,
    on_cancel: fn() -> E,
}

/// Retry retries an operation based on the backoff strategy.
#[pin_project]
pub struct Retry<I, O, C>
where
    O: Operation,
{
    #[pin]
    retry_state: RetryState<O>,
    #[pin]
    cancellation: Option<Cancellation<O::Error>>,
    backoff: I,
    operation: O,
    condition: C,
}

impl<I, O, C> Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    pub fn new<II: IntoIterator<IntoIter = I, Item = I::Item>>(
        backoff: II,
        mut operation: O,
        condition: C,
    ) -> Self {
        Self {
            retry_state: RetryState::Running(operation.run()),
            cancellation: None,
            backoff: backoff.into_iter(),
            condition,
            operation,
        }
    }

    /// Stops retrying (and abandons the in-flight attempt) as soon as `cancel` fires, resolving to
    /// the error returned by `on_cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken, on_cancel: fn() -> O::Error) -> Self {
        self.cancellation = Some(Cancellation {
            cancelled: cancel.cancelled_owned(),
            on_cancel,
        });
        self
    }

    /// cools off before the next retry by doing a sleep on period determined by the backoff [`strategy`]
    fn cool_off(mut self: Pin<&mut Self>, err: O::Error) -> Result<(), O::Error> {
        match self.as_mut().project().backoff.next() {
            // ran out of backoff, return the same error
            None => Err(err),
            Some(duration) => {
                let till = sleep_until(Instant::now() + duration);
                self.as_mut()
                    .project()
                    .retry_state
                    .set(RetryState::Sleeping(till));
                Ok(())
            }
        }
    }

    /// reattempts to run the [`Operation`] again.
    fn reattempt(mut self: Pin<&mut Self>) {
        let future = {
            let this = self.as_mut().project();
            this.operation.run()
        };
        self.as_mut()
            .project()
            .retry_state
            .set(RetryState::Running(future));
    }
}

impl<I, O, C> Future for Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    type Output = Result<O::Item, O::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(cancellation) = self.as_mut().project().cancellation.as_pin_mut() {
            let cancellation = cancellation.project();
            if cancellation.cancelled.poll(cx).is_ready() {
                return Poll::Ready(Err((*cancellation.on_cancel)()));
            }
        }

        match self.as_mut().project().retry_state.project() {
            RetryStateProj::Running(op) => match op.poll(cx) {
                Poll::Ready(Ok(item)) => Poll::Ready(Ok(item)),
                Poll::Ready(Err(e)) => {
                    if self.as_mut().condition.can_retry(&e) {
                        // wait for the cool-off period (aka backoff) before the next attempt
                        match self.as_mut().cool_off(e) {
                            Ok(_) => self.as_mut().poll(cx),
                            Err(e) => Poll::Ready(Err(e)),
                        }
                    } else {
                        Poll::Ready(Err(e))
                    }
                }
                Poll::Pending => Poll::Pending,
            },
            RetryStateProj::Sleeping(sleep) => match sleep.poll(cx) {
                Poll::Ready(_) => {
                    self.as_mut().reattempt();
                    self.poll(cx)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
