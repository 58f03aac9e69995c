use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config-object defaults from spec §9, loaded hierarchically:
/// programmatic defaults → `fleetwright.yaml` → `FLEETWRIGHT_`-prefixed env
/// vars (highest precedence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    #[serde(default = "default_max_activation_slots")]
    pub max_activation_slots: usize,

    #[serde(default = "default_activity_poll_interval_s")]
    pub activity_poll_interval_s: f64,

    #[serde(default = "default_activity_timeout_polls")]
    pub activity_timeout_polls: u32,

    #[serde(default = "default_parallel_map_default_concurrency")]
    pub parallel_map_default_concurrency: usize,

    #[serde(default = "default_phase_retry_attempts")]
    pub phase_retry_attempts: u32,

    #[serde(default = "default_phase_retry_base_s")]
    pub phase_retry_base_s: f64,

    #[serde(default = "default_job_ttl_s")]
    pub job_ttl_s: u64,

    #[serde(default = "default_job_lock_ttl_s")]
    pub job_lock_ttl_s: u64,

    #[serde(default = "default_unit_lock_ttl_s")]
    pub unit_lock_ttl_s: u64,

    #[serde(default = "default_sse_keepalive_s")]
    pub sse_keepalive_s: u64,

    /// Per-tenant requests/sec ceiling against the upstream controller.
    #[serde(default = "default_per_tenant_rate_limit")]
    pub per_tenant_rate_limit: f64,

    #[serde(default)]
    pub logging: super::super::logging::LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            max_concurrent_units: default_max_concurrent_units(),
            max_activation_slots: default_max_activation_slots(),
            activity_poll_interval_s: default_activity_poll_interval_s(),
            activity_timeout_polls: default_activity_timeout_polls(),
            parallel_map_default_concurrency: default_parallel_map_default_concurrency(),
            phase_retry_attempts: default_phase_retry_attempts(),
            phase_retry_base_s: default_phase_retry_base_s(),
            job_ttl_s: default_job_ttl_s(),
            job_lock_ttl_s: default_job_lock_ttl_s(),
            unit_lock_ttl_s: default_unit_lock_ttl_s(),
            sse_keepalive_s: default_sse_keepalive_s(),
            per_tenant_rate_limit: default_per_tenant_rate_limit(),
            logging: super::super::logging::LogConfig::default(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_max_concurrent_units() -> usize {
    10
}
fn default_max_activation_slots() -> usize {
    12
}
fn default_activity_poll_interval_s() -> f64 {
    3.0
}
fn default_activity_timeout_polls() -> u32 {
    60
}
fn default_parallel_map_default_concurrency() -> usize {
    10
}
fn default_phase_retry_attempts() -> u32 {
    3
}
fn default_phase_retry_base_s() -> f64 {
    2.0
}
fn default_job_ttl_s() -> u64 {
    604_800
}
fn default_job_lock_ttl_s() -> u64 {
    300
}
fn default_unit_lock_ttl_s() -> u64 {
    60
}
fn default_sse_keepalive_s() -> u64 {
    15
}
fn default_per_tenant_rate_limit() -> f64 {
    10.0
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_concurrent_units must be at least 1")]
    InvalidMaxConcurrentUnits,

    #[error("max_activation_slots must be at least 1")]
    InvalidMaxActivationSlots,

    #[error("activity_poll_interval_s must be positive")]
    InvalidActivityPollInterval,

    #[error("activity_timeout_polls must be at least 1")]
    InvalidActivityTimeoutPolls,

    #[error("phase_retry_attempts must be at least 1")]
    InvalidPhaseRetryAttempts,

    #[error("phase_retry_base_s must be greater than 1.0 for backoff to grow")]
    InvalidPhaseRetryBase,

    #[error("job_lock_ttl_s must be less than job_ttl_s")]
    LockTtlExceedsJobTtl,

    #[error("redis_url cannot be empty")]
    EmptyRedisUrl,

    #[error("per_tenant_rate_limit must be positive")]
    InvalidRateLimit,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): programmatic defaults,
    /// `fleetwright.yaml` in the working directory, `FLEETWRIGHT_*` env vars.
    pub fn load() -> anyhow::Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file("fleetwright.yaml"))
            .merge(Env::prefixed("FLEETWRIGHT_").split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.max_concurrent_units == 0 {
            return Err(ConfigError::InvalidMaxConcurrentUnits);
        }
        if config.max_activation_slots == 0 {
            return Err(ConfigError::InvalidMaxActivationSlots);
        }
        if config.activity_poll_interval_s <= 0.0 {
            return Err(ConfigError::InvalidActivityPollInterval);
        }
        if config.activity_timeout_polls == 0 {
            return Err(ConfigError::InvalidActivityTimeoutPolls);
        }
        if config.phase_retry_attempts == 0 {
            return Err(ConfigError::InvalidPhaseRetryAttempts);
        }
        if config.phase_retry_base_s <= 1.0 {
            return Err(ConfigError::InvalidPhaseRetryBase);
        }
        if config.job_lock_ttl_s >= config.job_ttl_s {
            return Err(ConfigError::LockTtlExceedsJobTtl);
        }
        if config.redis_url.is_empty() {
            return Err(ConfigError::EmptyRedisUrl);
        }
        if config.per_tenant_rate_limit <= 0.0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_9_and_validates() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_units, 10);
        assert_eq!(config.max_activation_slots, 12);
        assert!((config.activity_poll_interval_s - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.activity_timeout_polls, 60);
        assert_eq!(config.job_ttl_s, 604_800);
        assert_eq!(config.job_lock_ttl_s, 300);
        assert_eq!(config.unit_lock_ttl_s, 60);
        assert_eq!(config.sse_keepalive_s, 15);
        ConfigLoader::validate(&config).expect("defaults must validate");
    }

    #[test]
    fn rejects_lock_ttl_not_shorter_than_job_ttl() {
        let mut config = EngineConfig::default();
        config.job_lock_ttl_s = config.job_ttl_s;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::LockTtlExceedsJobTtl)));
    }

    #[test]
    fn rejects_zero_activation_slots() {
        let mut config = EngineConfig::default();
        config.max_activation_slots = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxActivationSlots)));
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let yaml = "max_concurrent_units: 25\nactivity_poll_interval_s: 1.5\n";
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(figment::providers::Yaml::string(yaml))
            .extract()
            .expect("yaml should merge over defaults");

        assert_eq!(config.max_concurrent_units, 25);
        assert!((config.activity_poll_interval_s - 1.5).abs() < f64::EPSILON);
        // Untouched fields keep their default.
        assert_eq!(config.max_activation_slots, 12);
    }
}
