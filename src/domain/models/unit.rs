//! Per-unit state (spec §3 `UnitMapping`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled)
    }
}

/// A single unit's state as it travels through the phase DAG. Created during
/// Phase 0 and mutated only while its unit lock (spec §4.5) is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMapping {
    pub unit_id: String,
    pub unit_number: String,

    /// The original per-unit inputs as supplied by the caller (names,
    /// passphrases, AP identifiers, VLAN, ...). Opaque to the engine —
    /// phase bodies interpret the keys.
    pub input_config: HashMap<String, serde_json::Value>,

    /// Planned names and will_create_*/*_exists booleans, computed by Phase 0.
    pub plan: HashMap<String, serde_json::Value>,

    /// Discovered or newly minted upstream ids, filled in as phases complete.
    pub resolved: HashMap<String, serde_json::Value>,

    pub status: UnitStatus,
    pub current_phase: Option<String>,
    pub completed_phases: Vec<String>,
    pub failed_phases: Vec<String>,
    pub phase_errors: HashMap<String, String>,
}

impl UnitMapping {
    pub fn new(unit_id: impl Into<String>, unit_number: impl Into<String>, input_config: HashMap<String, serde_json::Value>) -> Self {
        Self {
            unit_id: unit_id.into(),
            unit_number: unit_number.into(),
            input_config,
            plan: HashMap::new(),
            resolved: HashMap::new(),
            status: UnitStatus::Pending,
            current_phase: None,
            completed_phases: Vec::new(),
            failed_phases: Vec::new(),
            phase_errors: HashMap::new(),
        }
    }

    pub fn completed_set(&self) -> std::collections::HashSet<String> {
        self.completed_phases.iter().cloned().collect()
    }

    pub fn is_busy(&self) -> bool {
        self.current_phase.is_some()
    }

    pub fn record_success(&mut self, phase_id: &str, outputs: HashMap<String, serde_json::Value>) {
        self.resolved.extend(outputs);
        self.completed_phases.push(phase_id.to_string());
        self.current_phase = None;
    }

    pub fn record_skip(&mut self, phase_id: &str) {
        self.completed_phases.push(phase_id.to_string());
        self.current_phase = None;
    }

    pub fn record_failure(&mut self, phase_id: &str, error: impl Into<String>, critical: bool) {
        self.failed_phases.push(phase_id.to_string());
        self.phase_errors.insert(phase_id.to_string(), error.into());
        self.current_phase = None;
        if critical {
            self.status = UnitStatus::Failed;
        }
    }
}
