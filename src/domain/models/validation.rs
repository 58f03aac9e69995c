//! Output of a workflow's Phase 0 (the dry-run / plan), spec §3 `ValidationResult`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub unit_id: Option<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceActionKind {
    Create,
    Reuse,
    Rename,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAction {
    pub resource_type: String,
    pub name: String,
    pub action: ResourceActionKind,
    pub existing_id: Option<String>,
}

/// The full output of Phase 0 (spec §4.6 Step 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub conflicts: Vec<ConflictDetail>,
    pub actions: Vec<ResourceAction>,
    /// Aggregate counts, e.g. "ap_groups_to_create" -> 3.
    pub counts: HashMap<String, u64>,
    pub total_api_calls: u64,
}

impl ValidationResult {
    pub fn has_blocking_conflicts(&self) -> bool {
        self.conflicts.iter().any(|c| c.severity == Severity::Error)
    }

    /// Recomputes `valid` from the conflict list — Phase 0 implementations
    /// should call this rather than set `valid` by hand, so the two can
    /// never drift apart.
    pub fn finalize(mut self) -> Self {
        self.valid = !self.has_blocking_conflicts();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_is_invalid_with_error_conflict() {
        let result = ValidationResult {
            conflicts: vec![ConflictDetail {
                unit_id: None,
                resource_type: "wifi_network".into(),
                resource_name: "U101".into(),
                description: "name collision".into(),
                severity: Severity::Error,
            }],
            ..Default::default()
        }
        .finalize();
        assert!(!result.valid);
    }

    #[test]
    fn finalize_is_valid_with_only_warnings() {
        let result = ValidationResult {
            conflicts: vec![ConflictDetail {
                unit_id: None,
                resource_type: "wifi_network".into(),
                resource_name: "U101".into(),
                description: "reusing existing network".into(),
                severity: Severity::Warning,
            }],
            ..Default::default()
        }
        .finalize();
        assert!(result.valid);
    }
}
