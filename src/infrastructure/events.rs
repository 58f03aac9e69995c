//! Broadcast-based [`EventPublisher`] adapter (spec §6: SSE streaming).
//!
//! Grounded on the teacher's `EventBus` (`tokio::sync::broadcast` fan-out,
//! one sender shared process-wide, each HTTP stream subscribing its own
//! receiver) but stripped to the narrower `EventPublisher` port contract —
//! no sequence numbering, persistence, or severity/category taxonomy, since
//! event fan-out and storage are out of scope here.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::ports::{EventPublisher, JobEvent, PublishedEvent};
use crate::domain::EngineResult;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// One instance shared process-wide. Cloning the bus clones the sender
/// handle, not the channel — all clones publish onto the same broadcast.
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// One receiver per SSE connection (spec §6). Lagging subscribers drop
    /// the oldest events rather than blocking the publisher — a slow HTTP
    /// client should never stall job execution.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus {
    async fn publish(&self, event: JobEvent) -> EngineResult<()> {
        let job_id = job_id_of(&event);
        let envelope = PublishedEvent { job_id, at: chrono::Utc::now(), event };
        // No subscribers is the common case between a job's creation and its
        // first SSE client connecting — not an error.
        let _ = self.sender.send(envelope);
        Ok(())
    }
}

fn job_id_of(event: &JobEvent) -> String {
    match event {
        JobEvent::JobStarted { job_id }
        | JobEvent::PhaseStarted { job_id, .. }
        | JobEvent::PhaseMessage { job_id, .. }
        | JobEvent::PhaseCompleted { job_id, .. }
        | JobEvent::PhaseFailed { job_id, .. }
        | JobEvent::UnitCompleted { job_id, .. }
        | JobEvent::ProgressUpdated { job_id, .. }
        | JobEvent::JobCompleted { job_id, .. }
        | JobEvent::JobCancelled { job_id } => job_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = BroadcastEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(JobEvent::JobCancelled { job_id: "job-1".to_string() }).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, "job-1");
        assert!(matches!(received.event, JobEvent::JobCancelled { .. }));
    }

    #[tokio::test]
    async fn publishing_with_no_subscribers_does_not_error() {
        let bus = BroadcastEventBus::new();
        bus.publish(JobEvent::ProgressUpdated { job_id: "job-2".to_string(), progress: 0.5 }).await.unwrap();
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_independent_stream() {
        let bus = BroadcastEventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(JobEvent::JobCancelled { job_id: "job-3".to_string() }).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().job_id, "job-3");
        assert_eq!(rx2.recv().await.unwrap().job_id, "job-3");
    }
}
