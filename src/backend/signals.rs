//! Cooperative pause/cancel flags shared by a session's jobs.
//!
//! Workers observe the flags between units of work only. A paused waiter
//! sleeps on a [`Notify`] instead of polling and wakes on any flag change.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ControlSignals {
    paused: AtomicBool,
    cancelled: AtomicBool,
    changed: Notify,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Sticky until [`ControlSignals::reset`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn reset(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks while paused. Returns `false` if the job was cancelled, either
    /// before or during the wait.
    pub async fn wait_while_paused(&self) -> bool {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before reading the flags so a change in between is not lost.
            notified.as_mut().enable();

            if self.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            notified.await;
        }
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

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
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn unpaused_wait_returns_immediately() {
        let signals = ControlSignals::new();
        assert!(signals.wait_while_paused().await);
    }

    #[tokio::test]
    async fn paused_wait_blocks_until_resume() {
        let signals = Arc::new(ControlSignals::new());
        signals.pause();

        let waiter = tokio::spawn({
            let signals = Arc::clone(&signals);
            async move { signals.wait_while_paused().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        signals.resume();
        let proceed = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake on resume")
            .unwrap();
        assert!(proceed);
    }

    #[tokio::test]
    async fn cancel_releases_paused_waiter() {
        let signals = Arc::new(ControlSignals::new());
        signals.pause();

        let waiter = tokio::spawn({
            let signals = Arc::clone(&signals);
            async move { signals.wait_while_paused().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        signals.cancel();

        let proceed = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake on cancel")
            .unwrap();
        assert!(!proceed);
    }

    #[tokio::test]
    async fn reset_clears_both_flags() {
        let signals = ControlSignals::new();
        signals.pause();
        signals.cancel();
        signals.reset();

        assert!(!signals.is_paused());
        assert!(!signals.is_cancelled());
        assert!(signals.wait_while_paused().await);
    }
}
