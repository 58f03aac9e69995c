//! The top-level unit of work (spec §3 `Job`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::phase::{PhaseDefinition, PhaseStatus};
use super::unit::UnitMapping;
use super::validation::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    AwaitingConfirmation,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal transition from `self` (spec §3 invariant:
    /// once terminal, a job's status never changes again).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Validating)
                | (Pending, Cancelled)
                | (Validating, AwaitingConfirmation)
                | (Validating, Running)
                | (Validating, Failed)
                | (Validating, Cancelled)
                | (AwaitingConfirmation, Running)
                | (AwaitingConfirmation, Cancelled)
                | (Running, Completed)
                | (Running, Partial)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// The top-level unit of work submitted to the engine (spec §3).
///
/// `phase_definitions` is fixed at creation and `units` keys never change
/// once Phase 0 has run — only the values inside each [`UnitMapping`] mutate
/// as the scheduler drives units through the DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub venue_id: String,
    pub tenant_id: String,
    pub workflow_name: String,
    pub status: JobStatus,

    pub options: HashMap<String, serde_json::Value>,
    pub input_data: serde_json::Value,

    /// Copied from the workflow at creation time so later edits to the
    /// registered workflow never retroactively change a running job.
    pub phase_definitions: Vec<PhaseDefinition>,

    pub units: HashMap<String, UnitMapping>,
    pub global_phase_status: HashMap<String, PhaseStatus>,
    pub global_phase_results: HashMap<String, serde_json::Value>,
    pub validation: Option<ValidationResult>,

    /// Created upstream resources, grouped by resource type (e.g.
    /// "ap_groups" -> ["101", "102"]).
    pub created_resources: HashMap<String, Vec<String>>,
    pub errors: Vec<String>,

    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        venue_id: impl Into<String>,
        tenant_id: impl Into<String>,
        workflow_name: impl Into<String>,
        phase_definitions: Vec<PhaseDefinition>,
        options: HashMap<String, serde_json::Value>,
        input_data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let global_phase_status =
            phase_definitions.iter().filter(|p| !p.per_unit).map(|p| (p.id.clone(), PhaseStatus::Pending)).collect();
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            venue_id: venue_id.into(),
            tenant_id: tenant_id.into(),
            workflow_name: workflow_name.into(),
            status: JobStatus::Pending,
            options,
            input_data,
            phase_definitions,
            units: HashMap::new(),
            global_phase_status,
            global_phase_results: HashMap::new(),
            validation: None,
            created_resources: HashMap::new(),
            errors: Vec::new(),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Global phases whose status is COMPLETED or SKIPPED (spec §4.6).
    pub fn globals_completed(&self) -> std::collections::HashSet<String> {
        self.global_phase_status
            .iter()
            .filter(|(_, status)| matches!(status, PhaseStatus::Completed | PhaseStatus::Skipped))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn track_resource(&mut self, resource_type: impl Into<String>, resource_ref: impl Into<String>) {
        self.created_resources.entry(resource_type.into()).or_default().push(resource_ref.into());
    }

    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), crate::domain::EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::domain::EngineError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Fraction of units that have reached a terminal status, used by the
    /// progress endpoint (spec §4.7 / §6).
    pub fn progress(&self) -> f64 {
        if self.units.is_empty() {
            return if self.status.is_terminal() { 1.0 } else { 0.0 };
        }
        let done = self.units.values().filter(|u| u.status.is_terminal()).count();
        done as f64 / self.units.len() as f64
    }

    /// Final status rule (spec §4.6): COMPLETED if every non-skipped unit
    /// completed, FAILED if every non-skipped unit failed, PARTIAL otherwise.
    pub fn derive_final_status(&self) -> JobStatus {
        use super::unit::UnitStatus;
        let counted: Vec<_> = self.units.values().filter(|u| u.status != UnitStatus::Skipped).collect();
        if counted.is_empty() {
            return JobStatus::Completed;
        }
        let completed = counted.iter().filter(|u| u.status == UnitStatus::Completed).count();
        let failed = counted.iter().filter(|u| u.status == UnitStatus::Failed).count();
        if completed == counted.len() {
            JobStatus::Completed
        } else if failed == counted.len() {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_rejects_further_transitions() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn validating_can_skip_confirmation_straight_to_running() {
        assert!(JobStatus::Validating.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn derive_final_status_is_partial_on_mixed_outcomes() {
        let now = Utc::now();
        let mut job =
            Job::new("j1", "user-a", "venue-a", "tenant-a", "bulk_ssid", Vec::new(), HashMap::new(), serde_json::json!({}), now);
        let mut done = UnitMapping::new("u1", "101", HashMap::new());
        done.status = super::super::unit::UnitStatus::Completed;
        let mut failed = UnitMapping::new("u2", "102", HashMap::new());
        failed.status = super::super::unit::UnitStatus::Failed;
        job.units.insert("u1".into(), done);
        job.units.insert("u2".into(), failed);
        assert_eq!(job.derive_final_status(), JobStatus::Partial);
    }
}
