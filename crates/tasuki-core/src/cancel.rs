//! Cooperative cancellation shared between an orchestrator and its steps.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable cancellation signal.
///
/// Every clone observes the same state. Once cancelled, a signal stays
/// cancelled.
///
/// # Examples
///
/// ```
/// use tasuki_core::CancellationSignal;
///
/// let signal = CancellationSignal::new();
/// let observer = signal.clone();
///
/// assert!(!observer.is_cancelled());
/// signal.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// Creates a signal that has not been cancelled.
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels the signal and wakes every pending [`cancelled`](Self::cancelled) future.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when the signal is cancelled.
    ///
    /// Resolves immediately if the signal is already cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            // The sender lives as long as `self`, so this only fails if it is gone.
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
