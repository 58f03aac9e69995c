//! Phase executor contract (spec §4.2).
//!
//! Individual phase bodies (create an SSID, assign a DPSK pool, ...) are out
//! of scope for this crate — only the contract they implement against, and
//! the helper surface ([`PhaseContext`]) the scheduler hands them, live
//! here. Concrete phase bodies are registered against a workflow at process
//! startup through [`crate::services::registry`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::models::{ActivityResult, PhaseValidation};
use crate::domain::PhaseError;

/// Helper surface a [`PhaseExecutor`] uses to talk back to the engine
/// without depending on its concrete scheduler, state store, or activity
/// tracker. One instance is constructed per phase invocation, scoped to a
/// single (job, unit) pair for per-unit phases or to the job alone for
/// global phases.
#[async_trait]
pub trait PhaseContext: Send + Sync {
    fn job_id(&self) -> &str;
    fn unit_id(&self) -> Option<&str>;
    fn options(&self) -> &HashMap<String, Value>;
    fn input_data(&self) -> &Value;
    /// Values resolved by phases this one depends on.
    fn resolved(&self) -> &HashMap<String, Value>;

    /// Registers an outstanding upstream async operation with the activity
    /// tracker so its completion is polled centrally rather than by this
    /// phase spinning on it itself.
    async fn register_activity(&self, activity_id: String) -> Result<(), PhaseError>;

    /// Blocks until the named activity reaches a terminal state or the
    /// tracker's timeout budget is exhausted.
    async fn wait_for_activity(&self, activity_id: &str) -> Result<ActivityResult, PhaseError>;

    /// Convenience: register then wait in one call, the common case.
    async fn fire_and_wait(&self, activity_id: String) -> Result<ActivityResult, PhaseError> {
        self.register_activity(activity_id.clone()).await?;
        self.wait_for_activity(&activity_id).await
    }

    /// Records a created upstream resource against the job so it can be
    /// torn down on cancellation or reported in the final summary.
    async fn track_resource(&self, resource_ref: String) -> Result<(), PhaseError>;

    /// Publishes a status event for this phase invocation and logs it
    /// locally (spec §4.2 `emit(message, level, details?)`). `level` is a
    /// free-form string (`"info"`, `"error"`, `"success"`, ...) rather than
    /// a closed enum, matching the upstream convention of passing whatever
    /// the phase body finds most descriptive.
    async fn emit(&self, message: String, level: String, details: Option<Value>);
}

/// A named, typed input or output. Phase bodies describe their contract
/// once (spec §4.2) so the registry can statically validate wiring between
/// dependent phases at workflow-registration time.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub outputs: HashMap<String, Value>,
}

impl ExecutionOutcome {
    pub fn empty() -> Self {
        Self { outputs: HashMap::new() }
    }

    pub fn with(outputs: HashMap<String, Value>) -> Self {
        Self { outputs }
    }
}

/// A phase's executable body (spec §4.2). Implementations are registered
/// against a [`crate::domain::models::PhaseDefinition`] by id.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Cheap, synchronous precondition check the scheduler runs before
    /// dispatching — not Phase 0's dry-run validation, which operates over
    /// the whole job rather than a single phase invocation. Reports what
    /// `execute` would do (create vs. reuse, estimated API calls) so the
    /// scheduler and any caller inspecting it can short-circuit a doomed
    /// dispatch instead of paying for a failed `execute` round trip.
    fn validate(&self, ctx: &dyn PhaseContext) -> Result<PhaseValidation, PhaseError>;

    async fn execute(&self, ctx: &dyn PhaseContext) -> Result<ExecutionOutcome, PhaseError>;
}
