//! State store port (spec §4.5): Redis-backed persistence for jobs, units,
//! locks, the activity index, and cancellation flags. The concrete adapter
//! lives in [`crate::infrastructure::redis_store`].

use async_trait::async_trait;

use crate::domain::models::{ActivityRef, Job, UnitMapping};
use crate::domain::EngineResult;

/// An RAII-ish handle representing a held distributed lock. Dropping it
/// without calling [`LockGuard::release`] leaves the lock to expire on its
/// own TTL — callers should still release explicitly on the happy path so
/// another worker isn't stalled waiting out the TTL.
#[async_trait]
pub trait LockGuard: Send + Sync {
    async fn release(self: Box<Self>) -> EngineResult<()>;
}

/// Persistence and coordination contract the scheduler and activity tracker
/// depend on. Implementations must tolerate concurrent callers across worker
/// processes — this is not a single-process-only abstraction.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_job(&self, job: &Job) -> EngineResult<()>;
    async fn load_job(&self, job_id: &str) -> EngineResult<Option<Job>>;
    async fn delete_job(&self, job_id: &str) -> EngineResult<()>;
    async fn list_job_ids(&self, tenant_id: &str) -> EngineResult<Vec<String>>;

    async fn save_unit(&self, job_id: &str, unit: &UnitMapping) -> EngineResult<()>;
    async fn load_unit(&self, job_id: &str, unit_id: &str) -> EngineResult<Option<UnitMapping>>;

    /// Batched read of several units in one round trip (MGET), used by the
    /// status/progress endpoints to avoid N+1 lookups (spec §4.5).
    async fn load_units(&self, job_id: &str, unit_ids: &[String]) -> EngineResult<Vec<UnitMapping>>;

    /// Acquire the job-level lock; held for the duration of one scheduler
    /// tick (spec §4.6).
    async fn lock_job(&self, job_id: &str) -> EngineResult<Box<dyn LockGuard>>;

    /// Acquire a unit-level lock; held while a single unit's phase is
    /// in flight.
    async fn lock_unit(&self, job_id: &str, unit_id: &str) -> EngineResult<Box<dyn LockGuard>>;

    async fn index_activity(&self, activity: &ActivityRef) -> EngineResult<()>;
    async fn remove_activity(&self, job_id: &str, activity_id: &str) -> EngineResult<()>;
    async fn list_activities(&self, job_id: &str) -> EngineResult<Vec<ActivityRef>>;

    async fn request_cancellation(&self, job_id: &str) -> EngineResult<()>;
    async fn is_cancellation_requested(&self, job_id: &str) -> EngineResult<bool>;

    async fn record_created_resource(&self, job_id: &str, resource_ref: &str) -> EngineResult<()>;

    /// Drops state for jobs past their retention TTL (spec §4.5 cleanup).
    async fn cleanup_expired_jobs(&self) -> EngineResult<u64>;
}
