//! Process-wide workflow + phase executor registry (spec §4.1, §9).
//!
//! Workflows are registered once at process startup and treated as
//! immutable thereafter; a running job copies its phase definitions out of
//! the registry rather than holding a live reference, so editing a
//! registered workflow never retroactively changes a job already in flight.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::ports::PhaseExecutor;
use crate::domain::{EngineError, EngineResult, WorkflowDefinition};

/// Holds registered [`WorkflowDefinition`]s and the [`PhaseExecutor`] bound
/// to each (workflow, phase id) pair.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowDefinition>,
    executors: HashMap<(String, String), Arc<dyn PhaseExecutor>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow, validating its dependency graph eagerly so
    /// misconfiguration is caught at startup rather than at first job.
    pub fn register_workflow(&mut self, workflow: WorkflowDefinition) -> EngineResult<()> {
        workflow.build_graph()?;
        self.workflows.insert(workflow.name.clone(), workflow);
        Ok(())
    }

    pub fn register_executor(
        &mut self,
        workflow_name: impl Into<String>,
        phase_id: impl Into<String>,
        executor: Arc<dyn PhaseExecutor>,
    ) {
        self.executors.insert((workflow_name.into(), phase_id.into()), executor);
    }

    pub fn workflow(&self, name: &str) -> EngineResult<&WorkflowDefinition> {
        self.workflows.get(name).ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))
    }

    pub fn workflow_names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }

    pub fn executor(&self, workflow_name: &str, phase_id: &str) -> EngineResult<Arc<dyn PhaseExecutor>> {
        self.executors
            .get(&(workflow_name.to_string(), phase_id.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::UnknownPhase(format!("{workflow_name}/{phase_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PhaseDefinition;

    #[test]
    fn rejects_workflow_with_unknown_dependency() {
        let mut registry = WorkflowRegistry::new();
        let workflow = WorkflowDefinition::builder("broken")
            .phase(PhaseDefinition::builder("a", "A").depends_on(["missing"]).build())
            .build();
        assert!(registry.register_workflow(workflow).is_err());
    }

    #[test]
    fn looks_up_registered_workflow_by_name() {
        let mut registry = WorkflowRegistry::new();
        let workflow = WorkflowDefinition::builder("bulk_ssid").build();
        registry.register_workflow(workflow).unwrap();
        assert!(registry.workflow("bulk_ssid").is_ok());
        assert!(registry.workflow("ghost").is_err());
    }
}
