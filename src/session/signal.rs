//! One-shot completion signals
//!
//! A [`Completer`] is fulfilled at most once: `complete` consumes it. The
//! matching [`CompletionSignal`] is a future observed at most once: awaiting
//! consumes it. Dropping the completer cancels the observer; dropping the
//! observer turns a later completion into a logged no-op.

use crate::error::SignalError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Create a linked completer / signal pair for `operation`
pub fn completion_pair<T, E>(operation: &'static str) -> (Completer<T, E>, CompletionSignal<T, E>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { tx, operation },
        CompletionSignal { rx, operation },
    )
}

/// Fulfilling half, held by the session until the engine reports the outcome
#[derive(Debug)]
pub struct Completer<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
    operation: &'static str,
}

impl<T, E> Completer<T, E> {
    /// Deliver the outcome; a missing observer is logged, not an error
    pub fn complete(self, outcome: Result<T, E>) {
        if self.tx.send(outcome).is_err() {
            debug!(
                operation = self.operation,
                "completion observer is gone, outcome discarded"
            );
        }
    }

    /// Whether the observer has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Observing half, returned to the caller of a session operation
#[derive(Debug)]
#[must_use = "a completion signal does nothing unless awaited"]
pub struct CompletionSignal<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
    operation: &'static str,
}

impl<T, E> CompletionSignal<T, E> {
    /// A signal that is already fulfilled
    pub fn ready(operation: &'static str, outcome: Result<T, E>) -> Self {
        let (completer, signal) = completion_pair(operation);
        completer.complete(outcome);
        signal
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl<T, E: From<SignalError>> CompletionSignal<T, E> {
    /// Wait at most `timeout`; on expiry the wait is abandoned and the outcome,
    /// when it arrives, is discarded
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T, E> {
        let operation = self.operation;
        match tokio::time::timeout(timeout, self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SignalError::TimedOut { operation, timeout }.into()),
        }
    }
}

impl<T, E: From<SignalError>> Future for CompletionSignal<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SignalError::Cancelled {
                operation: this.operation,
            }
            .into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;

    #[tokio::test]
    async fn test_complete_then_observe() {
        let (completer, signal) = completion_pair::<u16, ConnectError>("connect");
        completer.complete(Ok(7));
        assert_eq!(signal.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_observer_blocks_until_fulfilled() {
        let (completer, signal) = completion_pair::<&str, ConnectError>("connect");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(Ok("done"));
        });
        assert_eq!(signal.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_dropped_completer_cancels() {
        let (completer, signal) = completion_pair::<(), ConnectError>("connect");
        drop(completer);
        let result = signal.await;
        assert!(matches!(
            result,
            Err(ConnectError::Signal(SignalError::Cancelled {
                operation: "connect"
            }))
        ));
    }

    #[tokio::test]
    async fn test_timeout_abandons_wait_without_blocking_completion() {
        let (completer, signal) = completion_pair::<(), ConnectError>("connect");
        let result = signal.wait_timeout(Duration::from_millis(5)).await;
        assert!(matches!(
            result,
            Err(ConnectError::Signal(SignalError::TimedOut { .. }))
        ));

        // Late completion is accepted and discarded
        assert!(completer.is_abandoned());
        completer.complete(Ok(()));
    }

    #[tokio::test]
    async fn test_ready_signal() {
        let signal = CompletionSignal::<u8, ConnectError>::ready("publish", Ok(1));
        assert_eq!(signal.operation(), "publish");
        assert_eq!(signal.await.unwrap(), 1);
    }
}
