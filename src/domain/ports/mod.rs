//! Domain ports (interfaces) for the workflow engine.

pub mod activity_source;
pub mod event_publisher;
pub mod null_activity_source;
pub mod phase_executor;
pub mod state_store;

pub use activity_source::ActivityStatusSource;
pub use null_activity_source::NullActivityStatusSource;
pub use event_publisher::{EventPublisher, JobEvent, PublishedEvent};
pub use phase_executor::{ExecutionOutcome, PhaseContext, PhaseExecutor};
pub use state_store::{LockGuard, StateStore};
