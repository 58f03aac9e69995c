//! Shared state handed to every axum handler.

use std::sync::Arc;

use crate::domain::ports::StateStore;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::BroadcastEventBus;
use crate::services::{Scheduler, WorkflowRegistry};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub state_store: Arc<dyn StateStore>,
    pub registry: Arc<WorkflowRegistry>,
    pub event_bus: BroadcastEventBus,
    pub config: EngineConfig,
}
