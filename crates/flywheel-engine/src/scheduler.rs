//! Cycle scheduler — a single deferred callback.
//!
//! Holds at most one pending timer at any instant: scheduling cancels any
//! previous timer, and `cancel` is idempotent. The timer is an abortable
//! Tokio task, so it never blocks process shutdown.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Single-shot deferred-callback timer for the next cycle.
#[derive(Default)]
pub struct CycleScheduler {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CycleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run after `delay`, cancelling any previously
    /// scheduled timer. Returns the wall-clock time the callback will fire.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> DateTime<Utc>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }

        let fire_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        debug!(%fire_at, "next cycle scheduled");
        fire_at
    }

    /// Cancel the pending timer, if any. Safe to call repeatedly.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
            debug!("scheduled cycle cancelled");
        }
    }

    /// Whether a timer is currently pending (fired timers count as spent).
    pub fn is_scheduled(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn schedule_fires_once() {
        let scheduler = CycleScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test]
    async fn rescheduling_cancels_the_previous_timer() {
        let scheduler = CycleScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));

        let first = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(20), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(20), async move {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Only the second callback ran.
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let scheduler = CycleScheduler::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        scheduler.schedule(Duration::from_millis(20), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel();
        scheduler.cancel();
        assert!(!scheduler.is_scheduled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn at_most_one_timer_pending() {
        let scheduler = CycleScheduler::new();
        for _ in 0..5 {
            scheduler.schedule(Duration::from_secs(60), async {});
        }
        assert!(scheduler.is_scheduled());
        scheduler.cancel();
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test]
    async fn schedule_returns_future_wall_clock_time() {
        let scheduler = CycleScheduler::new();
        let before = Utc::now();
        let at = scheduler.schedule(Duration::from_secs(30), async {});
        assert!(at > before);
        scheduler.cancel();
    }
}
