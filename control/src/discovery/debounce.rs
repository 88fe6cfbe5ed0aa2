//! Trigger debouncing
//!
//! Change notifications from the store arrive in bursts (a deployment
//! rollout touches Endpoints once per pod). The debouncer coalesces a burst
//! into a single callback that runs once the triggers have been quiet for a
//! full window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default quiescence window.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    counter: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            counter: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Schedule `action` to run after the quiescence window, unless a later
    /// trigger supersedes this one first. Superseded schedules are silently
    /// dropped.
    pub fn trigger<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = Arc::clone(&self.counter);
        let cancel = self.cancel.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    // Only the last trigger in the burst fires.
                    if counter.load(Ordering::SeqCst) == current {
                        action();
                    }
                }
            }
        });
    }

    /// Turn all pending schedules into no-ops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_call() {
        let debouncer = Debouncer::new(Duration::from_millis(750));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let calls = Arc::clone(&calls);
            debouncer.trigger(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        // Nothing fires until the window elapses from the LAST trigger.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::advance(Duration::from_millis(800)).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_triggers_each_fire() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            debouncer.trigger(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(200)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_schedules() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = Arc::clone(&calls);
            debouncer.trigger(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        debouncer.cancel();

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
