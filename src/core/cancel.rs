//! Cancellation tokens for held requests, observations and connections.
//!
//! A [`CancelSource`] owns the flag; any number of [`CancelToken`]s observe
//! it. Cancelling is idempotent: only the first call reports a transition.

use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    /// Create a new, not yet cancelled, source.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Get a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel. Returns `true` only for the call that performed the transition.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    /// Check whether the source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the source is cancelled.
    ///
    /// Also resolves once every [`CancelSource`] clone has been dropped,
    /// since nothing can keep the holder alive any more.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
