//! Cooperative cancellation signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation flag.
///
/// Background tasks poll [`is_cancelled`](Self::is_cancelled) at wait
/// boundaries or race [`cancelled`](Self::cancelled) against their sleeps.
/// Nothing is aborted; tasks observe the signal and unwind on their own.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every clone. Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the token has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
