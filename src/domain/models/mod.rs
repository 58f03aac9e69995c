pub mod activity;
pub mod dag;
pub mod job;
pub mod phase;
pub mod phase_validation;
pub mod unit;
pub mod validation;
pub mod workflow;

pub use activity::{ActivityRef, ActivityResult, ActivityTerminalState};
pub use dag::{DagError, DependencyGraph};
pub use job::{Job, JobStatus};
pub use phase::{ActivationSlot, ApiCallEstimate, ContractField, PhaseContract, PhaseDefinition, PhaseDefinitionBuilder, PhaseStatus, SkipIf};
pub use phase_validation::PhaseValidation;
pub use unit::{UnitMapping, UnitStatus};
pub use validation::{ConflictDetail, ResourceAction, ResourceActionKind, Severity, ValidationResult};
pub use workflow::{WorkflowDefinition, WorkflowDefinitionBuilder};
