//! Declarative workflow definitions (spec §4.1): a named DAG of phases plus
//! the knobs the scheduler needs (activation slot budget, confirmation
//! requirement, default options).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::dag::DependencyGraph;
use super::phase::PhaseDefinition;
use crate::domain::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub phases: Vec<PhaseDefinition>,
    pub max_activation_slots: usize,
    pub requires_confirmation: bool,
    pub default_options: HashMap<String, serde_json::Value>,
    /// The global phase that performs the Phase 0 dry-run (spec §4.6 Step 2).
    pub validate_phase_id: String,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder::new(name)
    }

    /// Validates and compiles this definition's phases into a [`DependencyGraph`].
    /// Workflows are registered once at process startup, so this cost is paid
    /// once per process, not per job.
    pub fn build_graph(&self) -> Result<DependencyGraph, EngineError> {
        DependencyGraph::build(self.phases.clone()).map_err(|e| EngineError::UnknownWorkflow(format!("{}: {e}", self.name)))
    }
}

pub struct WorkflowDefinitionBuilder {
    inner: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: WorkflowDefinition {
                name: name.into(),
                description: String::new(),
                phases: Vec::new(),
                max_activation_slots: 1,
                requires_confirmation: true,
                default_options: HashMap::new(),
                validate_phase_id: "validate".to_string(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    pub fn validate_phase_id(mut self, id: impl Into<String>) -> Self {
        self.inner.validate_phase_id = id.into();
        self
    }

    pub fn phase(mut self, phase: PhaseDefinition) -> Self {
        self.inner.phases.push(phase);
        self
    }

    pub fn phases(mut self, phases: impl IntoIterator<Item = PhaseDefinition>) -> Self {
        self.inner.phases.extend(phases);
        self
    }

    pub fn max_activation_slots(mut self, max: usize) -> Self {
        self.inner.max_activation_slots = max;
        self
    }

    pub fn requires_confirmation(mut self, requires: bool) -> Self {
        self.inner.requires_confirmation = requires;
        self
    }

    pub fn default_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.inner.default_options = options;
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_graph_from_registered_phases() {
        let workflow = WorkflowDefinition::builder("bulk_ssid")
            .phase(PhaseDefinition::builder("validate", "Validate").depends_on(Vec::<String>::new()).build())
            .phase(PhaseDefinition::builder("create_ssid", "Create SSID").depends_on(["validate"]).build())
            .max_activation_slots(5)
            .build();
        let graph = workflow.build_graph().unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn rejects_cyclic_phase_set_at_build_time() {
        let workflow = WorkflowDefinition::builder("broken")
            .phase(PhaseDefinition::builder("a", "A").depends_on(["b"]).build())
            .phase(PhaseDefinition::builder("b", "B").depends_on(["a"]).build())
            .build();
        assert!(workflow.build_graph().is_err());
    }
}
