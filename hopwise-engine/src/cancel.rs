//! Cooperative cancellation.
//!
//! The orchestrators check the token before every wave and every step
//! start, and stop waiting for a concurrency permit once it fires.
//! Invocations already in flight run to completion.

use std::sync::Arc;
use tokio::sync::watch;

/// Caller side: flips the shared flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Engine side: observes the shared flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, token) = cancel_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pends forever if every handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_observed_by_all_tokens() {
        let (handle, token) = cancel_pair();
        let other = handle.token();
        assert!(!token.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_never_token_stays_clear() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let (handle, token) = cancel_pair();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation observed")
            .unwrap();
    }
}
