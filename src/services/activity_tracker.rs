//! Activity Tracker (spec §4.3): coalesces polling of outstanding upstream
//! asynchronous operations instead of letting each phase poll its own
//! activity id, which would be quadratic in outstanding work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::domain::models::ActivityResult;
use crate::domain::ports::ActivityStatusSource;

#[derive(Debug, Clone, Copy)]
pub struct ActivityTrackerConfig {
    pub poll_interval: Duration,
    /// Per-activity wall-clock budget, expressed as a poll count (spec §4.3:
    /// "default 60 polls × 3 s = 180 s").
    pub timeout_polls: u32,
}

impl Default for ActivityTrackerConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(3), timeout_polls: 60 }
    }
}

struct PendingEntry {
    waiter: oneshot::Sender<ActivityResult>,
    polls_elapsed: u32,
}

/// One instance per job. `register`/`wait` are the only two operations
/// phase bodies call directly; `run` drives the background poll loop and is
/// spawned once by the scheduler when the job starts running.
pub struct ActivityTracker {
    config: ActivityTrackerConfig,
    pending: Mutex<HashMap<String, PendingEntry>>,
    source: Arc<dyn ActivityStatusSource>,
}

impl ActivityTracker {
    pub fn new(source: Arc<dyn ActivityStatusSource>, config: ActivityTrackerConfig) -> Self {
        Self { config, pending: Mutex::new(HashMap::new()), source }
    }

    /// Enrolls an activity id. Idempotent: registering the same id twice
    /// before it resolves is a no-op on the second call — the first waiter
    /// stays registered and gets woken when the activity resolves, so a
    /// phase that retries `register_activity` after a crash does not orphan
    /// it by overwriting its channel with a second one nobody awaits.
    pub async fn register(&self, activity_id: String) -> oneshot::Receiver<ActivityResult> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&activity_id) {
            // Caller gets a receiver whose sender is dropped immediately —
            // it resolves to `RecvError`, signaling "already registered"
            // rather than silently hanging forever.
            return rx;
        }
        pending.insert(activity_id, PendingEntry { waiter: tx, polls_elapsed: 0 });
        rx
    }

    /// Wakes every outstanding waiter with a cancelled result (spec §4.3.5,
    /// §4.6 cancellation semantics) and drops them from the pending set.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.waiter.send(ActivityResult::cancelled());
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Runs the poll loop until `stop` resolves. Intended to be spawned as a
    /// background task per job; `stop` is typically tied to the job reaching
    /// a terminal state.
    pub async fn run(&self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = &mut stop => return,
                _ = ticker.tick() => self.poll_once().await,
            }
        }
    }

    async fn poll_once(&self) {
        let ids: Vec<String> = {
            let pending = self.pending.lock().await;
            pending.keys().cloned().collect()
        };
        if ids.is_empty() {
            return;
        }

        let results = self.source.poll(&ids).await;

        let mut pending = self.pending.lock().await;
        let mut timed_out = Vec::new();
        for (id, entry) in pending.iter_mut() {
            if !results.contains_key(id) {
                entry.polls_elapsed += 1;
                if entry.polls_elapsed >= self.config.timeout_polls {
                    timed_out.push(id.clone());
                }
            }
        }

        for (id, result) in results {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.waiter.send(result);
            }
        }
        for id in timed_out {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.waiter.send(ActivityResult::timed_out());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActivityStatusSource for ScriptedSource {
        async fn poll(&self, activity_ids: &[String]) -> HashMap<String, ActivityResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                HashMap::new()
            } else {
                activity_ids.iter().map(|id| (id.clone(), ActivityResult::success(None))).collect()
            }
        }
    }

    #[tokio::test]
    async fn resolves_waiter_once_source_reports_terminal() {
        let source = Arc::new(ScriptedSource { calls: AtomicUsize::new(0) });
        let tracker =
            ActivityTracker::new(source, ActivityTrackerConfig { poll_interval: Duration::from_millis(5), timeout_polls: 100 });

        let rx = tracker.register("act-1".to_string()).await;
        tracker.poll_once().await;
        assert_eq!(tracker.pending_count().await, 1);
        tracker.poll_once().await;

        let result = rx.await.unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn duplicate_register_does_not_orphan_the_first_waiter() {
        let source = Arc::new(ScriptedSource { calls: AtomicUsize::new(0) });
        let tracker =
            ActivityTracker::new(source, ActivityTrackerConfig { poll_interval: Duration::from_millis(5), timeout_polls: 100 });

        let first = tracker.register("act-1".to_string()).await;
        let second = tracker.register("act-1".to_string()).await;
        assert_eq!(tracker.pending_count().await, 1);

        tracker.poll_once().await;
        tracker.poll_once().await;

        assert!(first.await.unwrap().is_success());
        // The second call's receiver belongs to a sender that was never
        // registered, so it resolves to a closed channel rather than hanging.
        assert!(second.await.is_err());
    }

    #[tokio::test]
    async fn cancel_all_wakes_every_waiter() {
        let source = Arc::new(ScriptedSource { calls: AtomicUsize::new(0) });
        let tracker = ActivityTracker::new(source, ActivityTrackerConfig::default());

        let rx1 = tracker.register("a".to_string()).await;
        let rx2 = tracker.register("b".to_string()).await;
        tracker.cancel_all().await;

        assert_eq!(rx1.await.unwrap().error.as_deref(), Some("cancelled"));
        assert_eq!(rx2.await.unwrap().error.as_deref(), Some("cancelled"));
        assert_eq!(tracker.pending_count().await, 0);
    }

    struct AlwaysPendingSource;

    #[async_trait]
    impl ActivityStatusSource for AlwaysPendingSource {
        async fn poll(&self, _activity_ids: &[String]) -> HashMap<String, ActivityResult> {
            HashMap::new()
        }
    }

    #[tokio::test]
    async fn activity_times_out_after_budget_exhausted() {
        let tracker = ActivityTracker::new(
            Arc::new(AlwaysPendingSource),
            ActivityTrackerConfig { poll_interval: Duration::from_millis(1), timeout_polls: 2 },
        );

        let rx = tracker.register("slow".to_string()).await;
        tracker.poll_once().await;
        tracker.poll_once().await;

        let result = rx.await.unwrap();
        assert!(result.is_timeout());
    }
}
