//! Sandbox pool configuration.
//!
//! Resolution precedence for every field: environment variable, then caller
//! override, then built-in default. Integer parse failures fall through
//! silently to the next layer rather than aborting startup.

use crate::error::{Result, SandboxError};

fn parse_env_value<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Pool sizing knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub min_warm: usize,
    pub max_total: usize,
    pub max_idle_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_warm: 0,
            max_total: 5,
            max_idle_ms: 300_000,
        }
    }
}

/// Per-container cgroup limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimitsConfig {
    pub memory_bytes: u64,
    pub nano_cpus: u64,
    pub pids_limit: i64,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            memory_bytes: 536_870_912,
            nano_cpus: 1_000_000_000,
            pids_limit: 256,
        }
    }
}

/// Health-check cadence and eviction threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    pub interval_ms: u64,
    pub max_failures: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_failures: 3,
        }
    }
}

/// Deadlines applied to individual operations.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutsConfig {
    pub exec_ms: u64,
    pub init_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            exec_ms: 60_000,
            init_ms: 120_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

/// Top-level immutable configuration for a sandbox pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    pub image: String,
    pub pool: PoolConfig,
    pub resource_limits: ResourceLimitsConfig,
    pub health_check: HealthCheckConfig,
    pub timeouts: TimeoutsConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "ubuntu:22.04".to_string(),
            pool: PoolConfig::default(),
            resource_limits: ResourceLimitsConfig::default(),
            health_check: HealthCheckConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

/// Caller-supplied overrides, applied after environment variables and before
/// built-in defaults would otherwise apply.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub image: Option<String>,
    pub min_warm: Option<usize>,
    pub max_total: Option<usize>,
    pub max_idle_ms: Option<u64>,
    pub memory_bytes: Option<u64>,
}

impl SandboxConfig {
    /// Builds config from built-in defaults, then applies environment
    /// variables, then caller overrides (env wins over overrides, per the
    /// documented precedence: env > override > default).
    pub fn load(overrides: Option<ConfigOverrides>) -> Result<Self> {
        let mut config = Self::default();
        let overrides = overrides.unwrap_or_default();

        config.image = overrides.image.clone().unwrap_or(config.image);
        if let Ok(image) = std::env::var("SANDBOX_IMAGE") {
            config.image = image;
        }

        config.pool.min_warm = overrides.min_warm.unwrap_or(config.pool.min_warm);
        if let Some(v) = parse_env_value::<usize>("SANDBOX_POOL_MIN_WARM") {
            config.pool.min_warm = v;
        }

        config.pool.max_total = overrides.max_total.unwrap_or(config.pool.max_total);
        if let Some(v) = parse_env_value::<usize>("SANDBOX_POOL_MAX_TOTAL") {
            config.pool.max_total = v;
        }

        config.pool.max_idle_ms = overrides.max_idle_ms.unwrap_or(config.pool.max_idle_ms);
        if let Some(v) = parse_env_value::<u64>("SANDBOX_POOL_MAX_IDLE_MS") {
            config.pool.max_idle_ms = v;
        }

        config.resource_limits.memory_bytes = overrides
            .memory_bytes
            .unwrap_or(config.resource_limits.memory_bytes);
        if let Some(v) = parse_env_value::<u64>("SANDBOX_MEMORY_BYTES") {
            config.resource_limits.memory_bytes = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_min_warm(mut self, min_warm: usize) -> Self {
        self.pool.min_warm = min_warm;
        self
    }

    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.pool.max_total = max_total;
        self
    }

    pub fn with_max_idle_ms(mut self, max_idle_ms: u64) -> Self {
        self.pool.max_idle_ms = max_idle_ms;
        self
    }

    /// Checks the invariants in the data model: `0 <= min_warm <= max_total`
    /// and every duration/limit is positive.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::Config("image must not be empty".into()));
        }
        if self.pool.min_warm > self.pool.max_total {
            return Err(SandboxError::Config(format!(
                "pool.min_warm ({}) must be <= pool.max_total ({})",
                self.pool.min_warm, self.pool.max_total
            )));
        }
        if self.pool.max_total == 0 {
            return Err(SandboxError::Config("pool.max_total must be > 0".into()));
        }
        if self.pool.max_idle_ms == 0 {
            return Err(SandboxError::Config("pool.max_idle_ms must be > 0".into()));
        }
        if self.resource_limits.memory_bytes == 0 {
            return Err(SandboxError::Config(
                "resource_limits.memory_bytes must be > 0".into(),
            ));
        }
        if self.resource_limits.pids_limit <= 0 {
            return Err(SandboxError::Config(
                "resource_limits.pids_limit must be > 0".into(),
            ));
        }
        if self.health_check.interval_ms == 0 || self.health_check.max_failures == 0 {
            return Err(SandboxError::Config(
                "health_check.interval_ms and max_failures must be > 0".into(),
            ));
        }
        if self.timeouts.exec_ms == 0 || self.timeouts.init_ms == 0 {
            return Err(SandboxError::Config(
                "timeouts.exec_ms and timeouts.init_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SandboxConfig::default();
        assert_eq!(config.image, "ubuntu:22.04");
        assert_eq!(config.pool.min_warm, 0);
        assert_eq!(config.pool.max_total, 5);
        assert_eq!(config.pool.max_idle_ms, 300_000);
        assert_eq!(config.resource_limits.memory_bytes, 536_870_912);
        assert_eq!(config.resource_limits.nano_cpus, 1_000_000_000);
        assert_eq!(config.health_check.max_failures, 3);
        assert_eq!(config.timeouts.exec_ms, 60_000);
    }

    #[test]
    fn builder_overrides_apply_when_no_env_set() {
        std::env::remove_var("SANDBOX_POOL_MIN_WARM");
        std::env::remove_var("SANDBOX_POOL_MAX_TOTAL");
        let overrides = ConfigOverrides {
            min_warm: Some(2),
            max_total: Some(4),
            ..Default::default()
        };
        let config = SandboxConfig::load(Some(overrides)).unwrap();
        assert_eq!(config.pool.min_warm, 2);
        assert_eq!(config.pool.max_total, 4);
    }

    #[test]
    fn validate_rejects_min_warm_above_max_total() {
        let config = SandboxConfig::default().with_min_warm(10).with_max_total(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_max_total() {
        let config = SandboxConfig::default().with_max_total(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn with_builders_chain() {
        let config = SandboxConfig::default()
            .with_image("python:3.11-slim")
            .with_min_warm(1)
            .with_max_total(3)
            .with_max_idle_ms(1_000);
        assert_eq!(config.image, "python:3.11-slim");
        assert_eq!(config.pool.min_warm, 1);
        assert_eq!(config.pool.max_total, 3);
        assert_eq!(config.pool.max_idle_ms, 1_000);
        config.validate().unwrap();
    }
}
