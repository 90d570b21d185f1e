//! Cooperative cancellation for suspended acquires and calls.

use std::cell::Cell;
use std::rc::Rc;

use tokio::sync::Notify;

/// Cancellation signal shared between the task that waits and the code that
/// gives up on it.
///
/// Clones observe the same signal. Cancelling is sticky.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Rc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Cell<bool>,
    notify: Notify,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
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
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let token = CancellationToken::new();
                let waiter = tokio::task::spawn_local({
                    let token = token.clone();
                    async move { token.cancelled().await }
                });

                tokio::task::yield_now().await;
                assert!(!token.is_cancelled());
                token.cancel();

                tokio::time::timeout(Duration::from_secs(1), waiter)
                    .await
                    .expect("waiter should wake")
                    .expect("waiter should not panic");
            })
            .await;
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
        assert!(token.clone().is_cancelled());
    }
}
