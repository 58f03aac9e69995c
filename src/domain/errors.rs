//! Domain errors for the workflow engine.

use thiserror::Error;

/// Domain-level errors that can occur while planning or executing a job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("unit not found: {unit_id} in job {job_id}")]
    UnitNotFound { job_id: String, unit_id: String },

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("unknown phase id referenced: {0}")]
    UnknownPhase(String),

    #[error("cycle detected in phase dependency graph, involving phase: {0}")]
    CycleDetected(String),

    #[error("phase {0} is unreachable from any root phase")]
    UnreachablePhase(String),

    #[error("invalid job state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("job {0} is not awaiting confirmation")]
    NotAwaitingConfirmation(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("phase execution failed: {kind:?}: {message}")]
    PhaseFailed { kind: PhaseErrorKind, message: String, retryable: bool },

    #[error("failed to acquire lock: {0}")]
    LockUnavailable(String),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("job {0} was cancelled")]
    Cancelled(String),

    #[error("activity {0} timed out")]
    ActivityTimeout(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`PhaseError`], used by the scheduler to decide
/// whether a retry is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseErrorKind {
    /// Caller-supplied input was invalid; never entered the scheduler in
    /// practice, but kept here so phase bodies can report it uniformly.
    InputValidation,
    /// Upstream returned a transient failure (network, 5xx, rate limit).
    UpstreamRetryable,
    /// Upstream returned a permanent failure (4xx other than rate-limit).
    UpstreamFatal,
    /// The centralized activity tracker gave up waiting on an async op.
    ActivityTimeout,
    /// Programmer/scheduler-level error: unknown phase, bad wiring, etc.
    Scheduler,
}

/// The error a [`crate::domain::ports::PhaseExecutor`] returns from `execute`
/// or `validate`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PhaseError {
    pub kind: PhaseErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl PhaseError {
    pub fn upstream_retryable(message: impl Into<String>) -> Self {
        Self { kind: PhaseErrorKind::UpstreamRetryable, message: message.into(), retryable: true }
    }

    pub fn upstream_fatal(message: impl Into<String>) -> Self {
        Self { kind: PhaseErrorKind::UpstreamFatal, message: message.into(), retryable: false }
    }

    pub fn activity_timeout(message: impl Into<String>) -> Self {
        Self { kind: PhaseErrorKind::ActivityTimeout, message: message.into(), retryable: true }
    }

    /// Idempotency convention (spec §4.2): an upstream "not found" response
    /// during a cascade-delete or cleanup step is treated as success, not as
    /// a `PhaseError` at all — callers should check this before constructing
    /// an error from a raw upstream message.
    pub fn is_not_found(message: &str) -> bool {
        message.to_lowercase().contains("not found")
    }
}

impl From<PhaseError> for EngineError {
    fn from(err: PhaseError) -> Self {
        EngineError::PhaseFailed { kind: err.kind, message: err.message, retryable: err.retryable }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::StateStore(err.to_string())
    }
}
