//! Cancellation latch consulted at every cooperative checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

struct Latch {
    flag: AtomicBool,
    notify: Notify,
}

impl Latch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One-way cancellation signal.
///
/// Once set it stays set. A child token observes its own latch *and* its
/// parent's, so a per-user stop leaves the strategy running while a
/// strategy stop reaches every user.
#[derive(Clone)]
pub struct StopToken {
    own: Arc<Latch>,
    parent: Option<Arc<Latch>>,
}

impl StopToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            own: Latch::new(),
            parent: None,
        }
    }

    /// A token that is cancelled by either its own [`StopToken::set`] or by
    /// this token's.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            own: Latch::new(),
            parent: Some(self.own.clone()),
        }
    }

    /// Latch this scope. Idempotent; never propagates upward.
    pub fn set(&self) {
        self.own.set();
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.own.is_set() || self.parent.as_ref().is_some_and(|parent| parent.is_set())
    }

    /// Resolves once any applicable scope is latched. Waiters are
    /// registered before the flags are read, so a concurrent `set` cannot
    /// slip through unobserved.
    pub async fn cancelled(&self) {
        match &self.parent {
            Some(parent) => {
                let own = self.own.notify.notified();
                let upstream = parent.notify.notified();
                tokio::pin!(own, upstream);
                own.as_mut().enable();
                upstream.as_mut().enable();
                if self.is_set() {
                    return;
                }
                tokio::select! {
                    _ = own => {}
                    _ = upstream => {}
                }
            }
            None => {
                let own = self.own.notify.notified();
                tokio::pin!(own);
                own.as_mut().enable();
                if self.is_set() {
                    return;
                }
                own.await;
            }
        }
    }

    /// Interruptible sleep. Returns `true` when the full duration elapsed,
    /// `false` when the token fired first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn set_is_sticky_and_idempotent() {
        let token = StopToken::new();
        assert!(!token.is_set());
        token.set();
        token.set();
        assert!(token.is_set());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn child_observes_parent_but_not_vice_versa() {
        let strategy = StopToken::new();
        let user = strategy.child();

        user.set();
        assert!(user.is_set());
        assert!(!strategy.is_set());

        let other_user = strategy.child();
        strategy.set();
        assert!(other_user.is_set());
        other_user.cancelled().await;
    }

    #[tokio::test]
    async fn sleep_unblocks_promptly_on_stop() {
        let token = StopToken::new();
        let sleeper = token.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let completed = sleeper.sleep(Duration::from_secs(30)).await;
            (completed, started.elapsed())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.set();
        let (completed, elapsed) = handle.await.expect("join");
        assert!(!completed);
        assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn sleep_completes_when_undisturbed() {
        let token = StopToken::new();
        assert!(token.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn cancellation_set_before_wait_is_observed() {
        let strategy = StopToken::new();
        strategy.set();
        let user = strategy.child();
        // Must return immediately rather than hang.
        tokio::time::timeout(Duration::from_millis(100), user.cancelled())
            .await
            .expect("pre-set token should cancel instantly");
    }
}
