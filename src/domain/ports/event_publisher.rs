//! Event publisher port (spec §4/§6): a thin pub/sub adapter the scheduler
//! pushes lifecycle events through for SSE consumers. Fan-out to individual
//! HTTP streams is out of scope here — this port only covers "publish".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::EngineResult;

/// SSE event payload shapes (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Fired the instant a job's status becomes `RUNNING`, whether that's
    /// right after Phase 0 (no confirmation required) or after `confirm`.
    JobStarted { job_id: String },
    PhaseStarted { job_id: String, phase_id: String, unit_id: Option<String> },
    PhaseCompleted { job_id: String, phase_id: String, unit_id: Option<String> },
    PhaseFailed { job_id: String, phase_id: String, unit_id: Option<String>, message: String },
    /// Free-form status message a phase body reports via `PhaseContext::emit`.
    PhaseMessage { job_id: String, phase_id: String, unit_id: Option<String>, level: String, message: String, details: Option<Value> },
    UnitCompleted { job_id: String, unit_id: String },
    ProgressUpdated { job_id: String, progress: f64 },
    JobCompleted { job_id: String, status: String },
    JobCancelled { job_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub job_id: String,
    pub at: DateTime<Utc>,
    pub event: JobEvent,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: JobEvent) -> EngineResult<()>;
}
