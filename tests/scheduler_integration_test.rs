//! End-to-end scheduler tests against an in-memory `StateStore` test double
//! (the teacher's habit of mocking a substrate for service-layer tests,
//! `adapters/substrates/mock.rs`, generalized here to the workflow engine's
//! port). Exercises the full create -> validate -> (confirm) -> execute ->
//! terminal lifecycle without a real Redis instance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use fleetwright::domain::models::{
    Job, JobStatus, PhaseDefinition, PhaseValidation, UnitMapping, UnitStatus, ValidationResult, WorkflowDefinition,
};
use fleetwright::domain::ports::{
    EventPublisher, ExecutionOutcome, JobEvent, LockGuard, NullActivityStatusSource, PhaseContext, PhaseExecutor, StateStore,
};
use fleetwright::domain::models::ActivityRef;
use fleetwright::domain::{EngineError, EngineResult, PhaseError};
use fleetwright::infrastructure::config::EngineConfig;
use fleetwright::services::{Scheduler, WorkflowRegistry};

// ---------------------------------------------------------------------
// In-memory StateStore test double
// ---------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    jobs: AsyncMutex<HashMap<String, Job>>,
    units: AsyncMutex<HashMap<(String, String), UnitMapping>>,
    locks: Arc<AsyncMutex<HashSet<String>>>,
    cancelled: AsyncMutex<HashSet<String>>,
    activities: AsyncMutex<HashMap<String, Vec<ActivityRef>>>,
}

impl MemoryStore {
    fn new() -> Self {
        Self { locks: Arc::new(AsyncMutex::new(HashSet::new())), ..Default::default() }
    }

    async fn acquire(&self, key: String) -> EngineResult<Box<dyn LockGuard>> {
        for _ in 0..200 {
            let mut locks = self.locks.lock().await;
            if locks.insert(key.clone()) {
                return Ok(Box::new(MemoryLockGuard { key, locks: self.locks.clone() }));
            }
            drop(locks);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Err(EngineError::LockUnavailable(key))
    }
}

struct MemoryLockGuard {
    key: String,
    locks: Arc<AsyncMutex<HashSet<String>>>,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    async fn release(self: Box<Self>) -> EngineResult<()> {
        self.locks.lock().await.remove(&self.key);
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> EngineResult<()> {
        self.jobs.lock().await.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> EngineResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn delete_job(&self, job_id: &str) -> EngineResult<()> {
        self.jobs.lock().await.remove(job_id);
        Ok(())
    }

    async fn list_job_ids(&self, tenant_id: &str) -> EngineResult<Vec<String>> {
        Ok(self.jobs.lock().await.values().filter(|j| j.tenant_id == tenant_id).map(|j| j.job_id.clone()).collect())
    }

    async fn save_unit(&self, job_id: &str, unit: &UnitMapping) -> EngineResult<()> {
        self.units.lock().await.insert((job_id.to_string(), unit.unit_id.clone()), unit.clone());
        Ok(())
    }

    async fn load_unit(&self, job_id: &str, unit_id: &str) -> EngineResult<Option<UnitMapping>> {
        Ok(self.units.lock().await.get(&(job_id.to_string(), unit_id.to_string())).cloned())
    }

    async fn load_units(&self, job_id: &str, unit_ids: &[String]) -> EngineResult<Vec<UnitMapping>> {
        let units = self.units.lock().await;
        Ok(unit_ids.iter().filter_map(|id| units.get(&(job_id.to_string(), id.clone())).cloned()).collect())
    }

    async fn lock_job(&self, job_id: &str) -> EngineResult<Box<dyn LockGuard>> {
        self.acquire(format!("job:{job_id}")).await
    }

    async fn lock_unit(&self, job_id: &str, unit_id: &str) -> EngineResult<Box<dyn LockGuard>> {
        self.acquire(format!("unit:{job_id}:{unit_id}")).await
    }

    async fn index_activity(&self, activity: &ActivityRef) -> EngineResult<()> {
        self.activities.lock().await.entry(activity.job_id.clone()).or_default().push(activity.clone());
        Ok(())
    }

    async fn remove_activity(&self, job_id: &str, activity_id: &str) -> EngineResult<()> {
        if let Some(list) = self.activities.lock().await.get_mut(job_id) {
            list.retain(|a| a.activity_id != activity_id);
        }
        Ok(())
    }

    async fn list_activities(&self, job_id: &str) -> EngineResult<Vec<ActivityRef>> {
        Ok(self.activities.lock().await.get(job_id).cloned().unwrap_or_default())
    }

    async fn request_cancellation(&self, job_id: &str) -> EngineResult<()> {
        self.cancelled.lock().await.insert(job_id.to_string());
        Ok(())
    }

    async fn is_cancellation_requested(&self, job_id: &str) -> EngineResult<bool> {
        Ok(self.cancelled.lock().await.contains(job_id))
    }

    async fn record_created_resource(&self, _job_id: &str, _resource_ref: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn cleanup_expired_jobs(&self) -> EngineResult<u64> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------
// In-memory EventPublisher test double
// ---------------------------------------------------------------------

#[derive(Clone, Default)]
struct RecordingPublisher {
    events: Arc<AsyncMutex<Vec<JobEvent>>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: JobEvent) -> EngineResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Phase executors
// ---------------------------------------------------------------------

struct ValidatePhase;

#[async_trait]
impl PhaseExecutor for ValidatePhase {
    fn validate(&self, _ctx: &dyn PhaseContext) -> Result<PhaseValidation, PhaseError> {
        Ok(PhaseValidation::ok())
    }

    async fn execute(&self, _ctx: &dyn PhaseContext) -> Result<ExecutionOutcome, PhaseError> {
        let mut units = HashMap::new();
        units.insert("unit-1".to_string(), UnitMapping::new("unit-1", "101", HashMap::new()));
        units.insert("unit-2".to_string(), UnitMapping::new("unit-2", "102", HashMap::new()));

        let validation = ValidationResult { valid: true, ..Default::default() }.finalize();

        let mut outputs = HashMap::new();
        outputs.insert("units".to_string(), serde_json::to_value(units).unwrap());
        outputs.insert("validation".to_string(), serde_json::to_value(validation).unwrap());
        Ok(ExecutionOutcome::with(outputs))
    }
}

struct CreateSsidPhase;

#[async_trait]
impl PhaseExecutor for CreateSsidPhase {
    fn validate(&self, _ctx: &dyn PhaseContext) -> Result<PhaseValidation, PhaseError> {
        Ok(PhaseValidation::ok())
    }

    async fn execute(&self, ctx: &dyn PhaseContext) -> Result<ExecutionOutcome, PhaseError> {
        let unit_id = ctx.unit_id().expect("create_ssid is per-unit").to_string();
        let mut outputs = HashMap::new();
        outputs.insert("ssid_id".to_string(), json!(format!("ssid-{unit_id}")));
        Ok(ExecutionOutcome::with(outputs))
    }
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

fn build_workflow(requires_confirmation: bool) -> WorkflowDefinition {
    WorkflowDefinition::builder("bulk_ssid")
        .validate_phase_id("validate")
        .requires_confirmation(requires_confirmation)
        .max_activation_slots(4)
        .phase(PhaseDefinition::builder("validate", "Validate").per_unit(false).depends_on(Vec::<String>::new()).build())
        .phase(PhaseDefinition::builder("create_ssid", "Create SSID").per_unit(true).depends_on(["validate"]).build())
        .build()
}

fn build_scheduler(requires_confirmation: bool) -> (Arc<Scheduler>, Arc<MemoryStore>) {
    let mut registry = WorkflowRegistry::new();
    registry.register_workflow(build_workflow(requires_confirmation)).unwrap();
    registry.register_executor("bulk_ssid", "validate", Arc::new(ValidatePhase));
    registry.register_executor("bulk_ssid", "create_ssid", Arc::new(CreateSsidPhase));

    let state_store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(registry),
        state_store.clone(),
        Arc::new(RecordingPublisher::default()),
        Arc::new(NullActivityStatusSource::new()),
        EngineConfig::default(),
    ));
    (scheduler, state_store)
}

async fn wait_for_terminal(store: &MemoryStore, job_id: &str) -> Job {
    for _ in 0..200 {
        if let Some(job) = store.load_job(job_id).await.unwrap() {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached a terminal status");
}

// ---------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------

#[tokio::test]
async fn job_without_confirmation_runs_straight_to_completion() {
    let (scheduler, store) = build_scheduler(false);

    let job = scheduler
        .create_job("job-1", "user-a", "venue-a", "tenant-a", "bulk_ssid", HashMap::new(), Value::Null)
        .await
        .unwrap();

    let job = Arc::clone(&scheduler).validate(&job.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);

    let job = wait_for_terminal(&store, "job-1").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.units.len(), 2);
    for unit in job.units.values() {
        assert_eq!(unit.status, UnitStatus::Completed);
        assert_eq!(unit.resolved.get("ssid_id"), Some(&json!(format!("ssid-{}", unit.unit_id))));
    }
}

#[tokio::test]
async fn job_requiring_confirmation_waits_then_completes_after_confirm() {
    let (scheduler, store) = build_scheduler(true);

    let job = scheduler
        .create_job("job-2", "user-a", "venue-a", "tenant-a", "bulk_ssid", HashMap::new(), Value::Null)
        .await
        .unwrap();

    let job = Arc::clone(&scheduler).validate(&job.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::AwaitingConfirmation);

    Arc::clone(&scheduler).confirm("job-2").await.unwrap();

    let job = wait_for_terminal(&store, "job-2").await;
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn cancelling_before_confirmation_terminates_immediately() {
    let (scheduler, store) = build_scheduler(true);

    let job =
        scheduler.create_job("job-3", "user-a", "venue-a", "tenant-a", "bulk_ssid", HashMap::new(), Value::Null).await.unwrap();
    Arc::clone(&scheduler).validate(&job.job_id).await.unwrap();

    scheduler.cancel("job-3").await.unwrap();

    let job = store.load_job("job-3").await.unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn confirm_on_a_job_not_awaiting_confirmation_is_rejected() {
    let (scheduler, _store) = build_scheduler(false);

    let job =
        scheduler.create_job("job-4", "user-a", "venue-a", "tenant-a", "bulk_ssid", HashMap::new(), Value::Null).await.unwrap();
    Arc::clone(&scheduler).validate(&job.job_id).await.unwrap();

    let err = Arc::clone(&scheduler).confirm("job-4").await.unwrap_err();
    assert!(matches!(err, EngineError::NotAwaitingConfirmation(_)));
}
