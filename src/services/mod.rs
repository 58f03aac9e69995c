//! Application services for the workflow engine: the stateful/behavioral
//! pieces that sit between the pure domain model and the infrastructure
//! adapters.

pub mod activation_gate;
pub mod activity_tracker;
pub mod parallel_map;
pub mod phase_context;
pub mod registry;
pub mod scheduler;

pub use activation_gate::ActivationGate;
pub use activity_tracker::{ActivityTracker, ActivityTrackerConfig};
pub use parallel_map::{parallel_map, ItemFailure, ParallelMapResult, ParallelMapSummary};
pub use phase_context::{find_or_create, EngineContext};
pub use registry::WorkflowRegistry;
pub use scheduler::Scheduler;
