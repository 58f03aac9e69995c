//! Request/response JSON shapes for the external HTTP surface (spec §6).
//!
//! These are plain serde types, deliberately separate from the domain
//! models they project — a wire shape is allowed to drift from the model it
//! summarizes (e.g. `JobSummary` omits `phase_definitions`) without forcing
//! `#[serde(skip)]` scars onto [`crate::domain::models::Job`] itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::models::{Job, JobStatus, PhaseDefinition, UnitMapping, ValidationResult};

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub user_id: String,
    pub venue_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub options: HashMap<String, Value>,
    #[serde(default)]
    pub input_data: Value,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub validation: Option<ValidationResult>,
    pub unit_count: usize,
}

impl From<Job> for PlanResponse {
    fn from(job: Job) -> Self {
        Self { job_id: job.job_id, status: job.status, unit_count: job.units.len(), validation: job.validation }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub workflow_name: String,
    pub status: JobStatus,
    pub progress: f64,
    pub units: HashMap<String, UnitSummary>,
    pub global_phases: HashMap<String, String>,
    pub errors: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UnitSummary {
    pub unit_number: String,
    pub status: String,
    pub current_phase: Option<String>,
    pub completed_phases: Vec<String>,
    pub failed_phases: Vec<String>,
}

impl From<&UnitMapping> for UnitSummary {
    fn from(unit: &UnitMapping) -> Self {
        Self {
            unit_number: unit.unit_number.clone(),
            status: format!("{:?}", unit.status),
            current_phase: unit.current_phase.clone(),
            completed_phases: unit.completed_phases.clone(),
            failed_phases: unit.failed_phases.clone(),
        }
    }
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            workflow_name: job.workflow_name.clone(),
            status: job.status,
            progress: job.progress(),
            units: job.units.iter().map(|(id, unit)| (id.clone(), UnitSummary::from(unit))).collect(),
            global_phases: job.global_phase_status.iter().map(|(id, status)| (id.clone(), format!("{status:?}"))).collect(),
            errors: job.errors.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListEntry {
    pub job_id: String,
    pub workflow_name: String,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Job> for JobListEntry {
    fn from(job: &Job) -> Self {
        Self { job_id: job.job_id.clone(), workflow_name: job.workflow_name.clone(), status: job.status, created_at: job.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphResponse {
    pub workflow_name: String,
    pub phases: Vec<GraphPhase>,
    pub levels: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct GraphPhase {
    pub id: String,
    pub name: String,
    pub depends_on: Vec<String>,
    pub per_unit: bool,
    pub critical: bool,
}

impl From<&PhaseDefinition> for GraphPhase {
    fn from(phase: &PhaseDefinition) -> Self {
        Self {
            id: phase.id.clone(),
            name: phase.name.clone(),
            depends_on: phase.depends_on.clone(),
            per_unit: phase.per_unit,
            critical: phase.critical,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteJobsRequest {
    pub job_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteJobsResponse {
    pub deleted: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::UnitStatus;

    #[test]
    fn job_status_response_reports_unit_summaries() {
        let now = chrono::Utc::now();
        let mut job = Job::new("j1", "u1", "v1", "t1", "bulk_ssid", Vec::new(), HashMap::new(), serde_json::json!({}), now);
        let mut unit = UnitMapping::new("unit-1", "101", HashMap::new());
        unit.status = UnitStatus::Running;
        unit.current_phase = Some("create_ssid".to_string());
        job.units.insert("unit-1".to_string(), unit);

        let response = JobStatusResponse::from(&job);
        assert_eq!(response.units.len(), 1);
        assert_eq!(response.units["unit-1"].current_phase.as_deref(), Some("create_ssid"));
    }

    #[test]
    fn plan_response_carries_unit_count_and_validation() {
        let now = chrono::Utc::now();
        let mut job = Job::new("j1", "u1", "v1", "t1", "bulk_ssid", Vec::new(), HashMap::new(), serde_json::json!({}), now);
        job.units.insert("unit-1".to_string(), UnitMapping::new("unit-1", "101", HashMap::new()));
        job.validation = Some(ValidationResult { valid: true, ..Default::default() });

        let response = PlanResponse::from(job);
        assert_eq!(response.unit_count, 1);
        assert!(response.validation.unwrap().valid);
    }
}
