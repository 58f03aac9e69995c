//! Concrete [`PhaseContext`] (spec §4.2): wires a phase invocation to the
//! Activity Tracker, the state store, and the event publisher, scoped to a
//! single (job, unit) pair for per-unit phases or to the job alone for
//! global phases.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::domain::models::{ActivityRef, ActivityResult};
use crate::domain::ports::{EventPublisher, JobEvent, PhaseContext, StateStore};
use crate::domain::PhaseError;

use super::activity_tracker::ActivityTracker;

pub struct EngineContext {
    job_id: String,
    unit_id: Option<String>,
    phase_id: String,
    options: HashMap<String, Value>,
    input_data: Value,
    resolved: HashMap<String, Value>,
    activity_tracker: Arc<ActivityTracker>,
    state_store: Arc<dyn StateStore>,
    event_publisher: Arc<dyn EventPublisher>,
    pending: Mutex<HashMap<String, oneshot::Receiver<ActivityResult>>>,
}

impl EngineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        unit_id: Option<String>,
        phase_id: String,
        options: HashMap<String, Value>,
        input_data: Value,
        resolved: HashMap<String, Value>,
        activity_tracker: Arc<ActivityTracker>,
        state_store: Arc<dyn StateStore>,
        event_publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            job_id,
            unit_id,
            phase_id,
            options,
            input_data,
            resolved,
            activity_tracker,
            state_store,
            event_publisher,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PhaseContext for EngineContext {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn unit_id(&self) -> Option<&str> {
        self.unit_id.as_deref()
    }

    fn options(&self) -> &HashMap<String, Value> {
        &self.options
    }

    fn input_data(&self) -> &Value {
        &self.input_data
    }

    fn resolved(&self) -> &HashMap<String, Value> {
        &self.resolved
    }

    async fn register_activity(&self, activity_id: String) -> Result<(), PhaseError> {
        let receiver = self.activity_tracker.register(activity_id.clone()).await;
        self.pending.lock().await.insert(activity_id.clone(), receiver);

        let activity_ref = ActivityRef {
            activity_id,
            job_id: self.job_id.clone(),
            unit_id: self.unit_id.clone(),
            phase_id: self.phase_id.clone(),
            submitted_at: Utc::now(),
        };
        self.state_store
            .index_activity(&activity_ref)
            .await
            .map_err(|e| PhaseError::upstream_retryable(e.to_string()))
    }

    async fn wait_for_activity(&self, activity_id: &str) -> Result<ActivityResult, PhaseError> {
        let receiver = self
            .pending
            .lock()
            .await
            .remove(activity_id)
            .ok_or_else(|| PhaseError::upstream_fatal(format!("activity {activity_id} was never registered")))?;

        let result = receiver
            .await
            .map_err(|_| PhaseError::activity_timeout(format!("activity {activity_id} tracker dropped its waiter")))?;

        let _ = self.state_store.remove_activity(&self.job_id, activity_id).await;

        if result.is_timeout() {
            return Err(PhaseError::activity_timeout(result.error.clone().unwrap_or_default()));
        }
        Ok(result)
    }

    async fn track_resource(&self, resource_ref: String) -> Result<(), PhaseError> {
        self.state_store
            .record_created_resource(&self.job_id, &resource_ref)
            .await
            .map_err(|e| PhaseError::upstream_retryable(e.to_string()))
    }

    async fn emit(&self, message: String, level: String, details: Option<Value>) {
        tracing::info!(job_id = %self.job_id, unit_id = ?self.unit_id, phase_id = %self.phase_id, level = %level, "{message}");
        let _ = self
            .event_publisher
            .publish(JobEvent::PhaseMessage {
                job_id: self.job_id.clone(),
                phase_id: self.phase_id.clone(),
                unit_id: self.unit_id.clone(),
                level,
                message,
                details,
            })
            .await;
    }
}

/// Generalizes `original_source/api/workflow/idempotent.py`'s
/// `find_or_create_generic`: look the resource up by name; if absent, create
/// it; if creation races with another worker and fails with a name
/// collision, re-run `lookup` once more rather than propagating the error —
/// the collision itself is proof the resource now exists.
pub async fn find_or_create<T, L, LFut, C, CFut>(lookup: L, create: C) -> Result<T, PhaseError>
where
    L: Fn() -> LFut,
    LFut: Future<Output = Result<Option<T>, PhaseError>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<T, PhaseError>>,
{
    if let Some(existing) = lookup().await? {
        return Ok(existing);
    }

    match create().await {
        Ok(created) => Ok(created),
        Err(err) if is_name_collision(&err.message) => {
            lookup().await?.ok_or_else(|| PhaseError::upstream_fatal(format!(
                "create reported a name collision but re-lookup still found nothing: {}",
                err.message
            )))
        }
        Err(err) => Err(err),
    }
}

fn is_name_collision(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already exists") || lower.contains("duplicate") || lower.contains("conflict")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returns_existing_without_calling_create() {
        let create_calls = AtomicUsize::new(0);
        let result = find_or_create(
            || async { Ok(Some(42)) },
            || async {
                create_calls.fetch_add(1, Ordering::SeqCst);
                Ok(99)
            },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn creates_when_lookup_finds_nothing() {
        let result = find_or_create(|| async { Ok(None) }, || async { Ok(7) }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn retries_lookup_once_on_name_collision() {
        let lookups = AtomicUsize::new(0);
        let result = find_or_create(
            || {
                let n = lookups.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Ok(None) } else { Ok(Some(5)) } }
            },
            || async { Err(PhaseError::upstream_fatal("resource already exists")) },
        )
        .await
        .unwrap();
        assert_eq!(result, 5);
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn propagates_genuine_create_failures() {
        let result: Result<i32, _> =
            find_or_create(|| async { Ok(None) }, || async { Err(PhaseError::upstream_fatal("permission denied")) }).await;
        assert!(result.is_err());
    }
}
