//! Asynchronous upstream-operation tracking (spec §3 `ActivityRef`, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending upstream asynchronous operation, identified by an opaque id
/// the upstream controller assigned when it accepted a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRef {
    pub activity_id: String,
    pub job_id: String,
    pub unit_id: Option<String>,
    pub phase_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal state the Activity Tracker reports back to a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityTerminalState {
    Success,
    Fail,
    Timeout,
}

/// What `wait_for_activity` resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityResult {
    pub state: ActivityTerminalState,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ActivityResult {
    pub fn success(data: Option<serde_json::Value>) -> Self {
        Self { state: ActivityTerminalState::Success, data, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { state: ActivityTerminalState::Fail, data: None, error: Some(error.into()) }
    }

    pub fn timed_out() -> Self {
        Self { state: ActivityTerminalState::Timeout, data: None, error: Some("activity polling budget exhausted".into()) }
    }

    pub fn cancelled() -> Self {
        Self { state: ActivityTerminalState::Fail, data: None, error: Some("cancelled".into()) }
    }

    pub fn is_success(&self) -> bool {
        self.state == ActivityTerminalState::Success
    }

    pub fn is_timeout(&self) -> bool {
        self.state == ActivityTerminalState::Timeout
    }
}
