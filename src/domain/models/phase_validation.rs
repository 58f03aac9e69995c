//! Per-invocation precondition check a [`crate::domain::ports::PhaseExecutor`]
//! runs before the scheduler commits to `execute` (spec §4.2). Distinct from
//! [`super::ValidationResult`], which is the whole-job Phase 0 dry-run output;
//! this one is scoped to a single phase invocation and is cheap enough to run
//! synchronously on the scheduler's own task before dispatch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseValidation {
    pub valid: bool,
    pub will_create: bool,
    pub will_reuse: bool,
    pub existing_resource_id: Option<String>,
    pub estimated_api_calls: u32,
    pub actions: Vec<String>,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PhaseValidation {
    /// The common case: no preconditions to report, go ahead and dispatch.
    pub fn ok() -> Self {
        Self {
            valid: true,
            will_create: false,
            will_reuse: false,
            existing_resource_id: None,
            estimated_api_calls: 0,
            actions: Vec::new(),
            notes: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self { valid: false, errors, ..Self::ok() }
    }
}

impl Default for PhaseValidation {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reports_valid_with_no_errors() {
        let v = PhaseValidation::ok();
        assert!(v.valid);
        assert!(v.errors.is_empty());
    }

    #[test]
    fn invalid_carries_the_error_list() {
        let v = PhaseValidation::invalid(vec!["missing dpsk pool".to_string()]);
        assert!(!v.valid);
        assert_eq!(v.errors, vec!["missing dpsk pool".to_string()]);
    }
}
