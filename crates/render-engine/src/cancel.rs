//! Cooperative cancellation shared between the caller and a render.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use cutroom_common::error::{CutroomError, CutroomResult};

/// Cloneable cancellation flag. Tripping any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!("Render cancellation requested");
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag has been tripped.
    pub fn check(&self) -> CutroomResult<()> {
        if self.is_cancelled() {
            Err(CutroomError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the flag is tripped.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(CutroomError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let flag = CancelFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };
        tokio::task::yield_now().await;
        flag.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let flag = CancelFlag::new();
        flag.cancel();
        flag.cancelled().await;
    }
}
