//! Redis-backed [`StateStore`] (spec §4.5). Keys are namespaced under
//! `workflow:v2:` so the engine can share a Redis instance with other
//! systems. Mirrors the teacher's one-adapter-per-port layout.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use crate::domain::models::{ActivityRef, Job, UnitMapping};
use crate::domain::ports::{LockGuard, StateStore};
use crate::domain::{EngineError, EngineResult};

const NS: &str = "workflow:v2";

fn job_key(job_id: &str) -> String {
    format!("{NS}:jobs:{job_id}")
}
fn job_units_index_key(job_id: &str) -> String {
    format!("{NS}:jobs:{job_id}:unit_ids")
}
fn unit_key(job_id: &str, unit_id: &str) -> String {
    format!("{NS}:jobs:{job_id}:units:{unit_id}")
}
fn job_lock_key(job_id: &str) -> String {
    format!("{NS}:locks:job:{job_id}")
}
fn unit_lock_key(job_id: &str, unit_id: &str) -> String {
    format!("{NS}:locks:unit:{job_id}:{unit_id}")
}
fn cancelled_key(job_id: &str) -> String {
    format!("{NS}:jobs:{job_id}:cancelled")
}
fn job_activities_key(job_id: &str) -> String {
    format!("{NS}:jobs:{job_id}:activities")
}
fn activities_pending_key() -> String {
    format!("{NS}:activities:pending")
}
fn jobs_index_key() -> String {
    format!("{NS}:jobs:index")
}
fn jobs_by_venue_key(venue_id: &str) -> String {
    format!("{NS}:jobs:by_venue:{venue_id}")
}
fn jobs_active_key() -> String {
    format!("{NS}:jobs:active")
}

/// Releases a lock only if the caller still holds it (value matches the
/// token it was acquired with), so a worker can never release a lock another
/// worker re-acquired after its own TTL expired.
const RELEASE_IF_OWNER: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

pub struct RedisStateStore {
    conn: ConnectionManager,
    job_ttl_s: u64,
    job_lock_ttl_s: u64,
    unit_lock_ttl_s: u64,
    lock_retry_attempts: u32,
    lock_retry_backoff: Duration,
}

impl RedisStateStore {
    pub async fn connect(
        redis_url: &str,
        job_ttl_s: u64,
        job_lock_ttl_s: u64,
        unit_lock_ttl_s: u64,
    ) -> EngineResult<Self> {
        let client = redis::Client::open(redis_url).map_err(EngineError::from)?;
        let conn = ConnectionManager::new(client).await.map_err(EngineError::from)?;
        Ok(Self {
            conn,
            job_ttl_s,
            job_lock_ttl_s,
            unit_lock_ttl_s,
            lock_retry_attempts: 10,
            lock_retry_backoff: Duration::from_millis(50),
        })
    }

    async fn acquire_lock(&self, key: &str, ttl_s: u64) -> EngineResult<Box<dyn LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        for attempt in 0..self.lock_retry_attempts {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_s * 1000)
                .query_async(&mut conn)
                .await
                .map_err(EngineError::from)?;
            let acquired = reply.as_deref() == Some("OK");
            if acquired {
                return Ok(Box::new(RedisLockGuard { conn: conn.clone(), key: key.to_string(), token }));
            }
            tokio::time::sleep(self.lock_retry_backoff * (attempt + 1)).await;
        }
        Err(EngineError::LockUnavailable(key.to_string()))
    }
}

struct RedisLockGuard {
    conn: ConnectionManager,
    key: String,
    token: String,
}

#[async_trait]
impl LockGuard for RedisLockGuard {
    async fn release(mut self: Box<Self>) -> EngineResult<()> {
        let script = Script::new(RELEASE_IF_OWNER);
        let _: i64 = script.key(&self.key).arg(&self.token).invoke_async(&mut self.conn).await.map_err(EngineError::from)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn save_job(&self, job: &Job) -> EngineResult<()> {
        let mut conn = self.conn.clone();

        // Units are persisted separately (spec §4.5: "different workers can
        // concurrently mutate different units without contention"); the job
        // blob itself carries everything else.
        let mut job_without_units = job.clone();
        job_without_units.units.clear();
        let payload = serde_json::to_string(&job_without_units)?;

        let key = job_key(&job.job_id);
        conn.set_ex::<_, _, ()>(&key, payload, self.job_ttl_s).await.map_err(EngineError::from)?;

        let _: () = conn.zadd(jobs_index_key(), &job.job_id, job.created_at.timestamp()).await.map_err(EngineError::from)?;
        let _: () = conn.sadd(jobs_by_venue_key(&job.venue_id), &job.job_id).await.map_err(EngineError::from)?;

        if job.status.is_terminal() {
            let _: () = conn.srem(jobs_active_key(), &job.job_id).await.map_err(EngineError::from)?;
        } else {
            let _: () = conn.sadd(jobs_active_key(), &job.job_id).await.map_err(EngineError::from)?;
        }

        for unit in job.units.values() {
            self.save_unit(&job.job_id, unit).await?;
        }

        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> EngineResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(job_key(job_id)).await.map_err(EngineError::from)?;
        let Some(payload) = payload else { return Ok(None) };
        let mut job: Job = serde_json::from_str(&payload)?;

        let unit_ids: Vec<String> = conn.smembers(job_units_index_key(job_id)).await.map_err(EngineError::from)?;
        let units = self.load_units(job_id, &unit_ids).await?;
        for unit in units {
            job.units.insert(unit.unit_id.clone(), unit);
        }

        Ok(Some(job))
    }

    async fn delete_job(&self, job_id: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let unit_ids: Vec<String> = conn.smembers(job_units_index_key(job_id)).await.map_err(EngineError::from)?;
        for unit_id in &unit_ids {
            let _: () = conn.del(unit_key(job_id, unit_id)).await.map_err(EngineError::from)?;
        }
        let _: () = conn.del(job_units_index_key(job_id)).await.map_err(EngineError::from)?;
        let _: () = conn.del(job_key(job_id)).await.map_err(EngineError::from)?;
        let _: () = conn.del(cancelled_key(job_id)).await.map_err(EngineError::from)?;
        let _: () = conn.zrem(jobs_index_key(), job_id).await.map_err(EngineError::from)?;
        let _: () = conn.srem(jobs_active_key(), job_id).await.map_err(EngineError::from)?;
        Ok(())
    }

    async fn list_job_ids(&self, tenant_id: &str) -> EngineResult<Vec<String>> {
        // Tenant scoping happens above this adapter (spec §1: tenant/RBAC is
        // out of scope for the engine); here we simply filter the global
        // index by re-reading each job's tenant_id.
        let mut conn = self.conn.clone();
        let all_ids: Vec<String> = conn.zrange(jobs_index_key(), 0, -1).await.map_err(EngineError::from)?;
        let mut result = Vec::new();
        for id in all_ids {
            if let Some(job) = self.load_job(&id).await? {
                if job.tenant_id == tenant_id {
                    result.push(id);
                }
            }
        }
        Ok(result)
    }

    async fn save_unit(&self, job_id: &str, unit: &UnitMapping) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(unit)?;
        conn.set_ex::<_, _, ()>(unit_key(job_id, &unit.unit_id), payload, self.job_ttl_s).await.map_err(EngineError::from)?;
        let _: () = conn.sadd(job_units_index_key(job_id), &unit.unit_id).await.map_err(EngineError::from)?;
        Ok(())
    }

    async fn load_unit(&self, job_id: &str, unit_id: &str) -> EngineResult<Option<UnitMapping>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(unit_key(job_id, unit_id)).await.map_err(EngineError::from)?;
        payload.map(|p| serde_json::from_str(&p).map_err(EngineError::from)).transpose()
    }

    async fn load_units(&self, job_id: &str, unit_ids: &[String]) -> EngineResult<Vec<UnitMapping>> {
        if unit_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = unit_ids.iter().map(|id| unit_key(job_id, id)).collect();
        let payloads: Vec<Option<String>> = conn.mget(keys).await.map_err(EngineError::from)?;
        payloads.into_iter().flatten().map(|p| serde_json::from_str(&p).map_err(EngineError::from)).collect()
    }

    async fn lock_job(&self, job_id: &str) -> EngineResult<Box<dyn LockGuard>> {
        self.acquire_lock(&job_lock_key(job_id), self.job_lock_ttl_s).await
    }

    async fn lock_unit(&self, job_id: &str, unit_id: &str) -> EngineResult<Box<dyn LockGuard>> {
        self.acquire_lock(&unit_lock_key(job_id, unit_id), self.unit_lock_ttl_s).await
    }

    async fn index_activity(&self, activity: &ActivityRef) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(activity)?;
        let _: () = conn.hset(activities_pending_key(), &activity.activity_id, payload).await.map_err(EngineError::from)?;
        let _: () = conn.sadd(job_activities_key(&activity.job_id), &activity.activity_id).await.map_err(EngineError::from)?;
        Ok(())
    }

    async fn remove_activity(&self, job_id: &str, activity_id: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(activities_pending_key(), activity_id).await.map_err(EngineError::from)?;
        let _: () = conn.srem(job_activities_key(job_id), activity_id).await.map_err(EngineError::from)?;
        Ok(())
    }

    async fn list_activities(&self, job_id: &str) -> EngineResult<Vec<ActivityRef>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(job_activities_key(job_id)).await.map_err(EngineError::from)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let payloads: Vec<Option<String>> = conn.hget(activities_pending_key(), &ids).await.map_err(EngineError::from)?;
        payloads.into_iter().flatten().map(|p| serde_json::from_str(&p).map_err(EngineError::from)).collect()
    }

    async fn request_cancellation(&self, job_id: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(cancelled_key(job_id), "1", self.job_ttl_s).await.map_err(EngineError::from)
    }

    async fn is_cancellation_requested(&self, job_id: &str) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        let flag: Option<String> = conn.get(cancelled_key(job_id)).await.map_err(EngineError::from)?;
        Ok(flag.is_some())
    }

    async fn record_created_resource(&self, job_id: &str, resource_ref: &str) -> EngineResult<()> {
        let lock = self.lock_job(job_id).await?;
        let Some(mut job) = self.load_job(job_id).await? else {
            lock.release().await?;
            return Err(EngineError::JobNotFound(job_id.to_string()));
        };
        let (resource_type, reference) = resource_ref.split_once(':').unwrap_or(("resource", resource_ref));
        job.track_resource(resource_type, reference);
        self.save_job(&job).await?;
        lock.release().await
    }

    async fn cleanup_expired_jobs(&self) -> EngineResult<u64> {
        let mut conn = self.conn.clone();
        let all_ids: Vec<String> = conn.zrange(jobs_index_key(), 0, -1).await.map_err(EngineError::from)?;
        let mut purged = 0u64;
        for id in all_ids {
            let exists: bool = conn.exists(job_key(&id)).await.map_err(EngineError::from)?;
            if !exists {
                let _: () = conn.zrem(jobs_index_key(), &id).await.map_err(EngineError::from)?;
                let _: () = conn.srem(jobs_active_key(), &id).await.map_err(EngineError::from)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
