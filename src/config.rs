use crate::circuit_breaker::CircuitBreakerConfig;
use crate::pagination::PaginationOptions;
use crate::retry::RetryPolicy;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_factor: policy.backoff_factor,
            jitter: policy.jitter,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout_ms: config.recovery_timeout.as_millis() as u64,
            success_threshold: config.success_threshold,
        }
    }
}

impl BreakerConfig {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            success_threshold: self.success_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub page_size: usize,
    pub scroll_threshold: f64,
    pub enabled: bool,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        let options = PaginationOptions::default();
        Self {
            page_size: options.page_size,
            scroll_threshold: options.scroll_threshold,
            enabled: options.enabled,
        }
    }
}

impl PaginationConfig {
    pub fn options(&self) -> PaginationOptions {
        PaginationOptions {
            page_size: self.page_size,
            scroll_threshold: self.scroll_threshold,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub circuit_breaker: BreakerConfig,
    pub pagination: PaginationConfig,
}

impl Config {
    /// Load `config.toml` from the working directory.
    pub fn new() -> Result<Self> {
        Self::from_file(DEFAULT_CONFIG_PATH)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = config_str
            .parse()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Config: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempts < 1 {
            bail!("retry.max_attempts must be at least 1");
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            bail!(
                "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                retry.max_delay_ms,
                retry.base_delay_ms
            );
        }
        if !(retry.backoff_factor >= 1.0 && retry.backoff_factor.is_finite()) {
            bail!("retry.backoff_factor must be a finite number >= 1");
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold < 1 {
            bail!("circuit_breaker.failure_threshold must be at least 1");
        }
        if breaker.success_threshold < 1 {
            bail!("circuit_breaker.success_threshold must be at least 1");
        }

        let pagination = &self.pagination;
        if pagination.page_size < 1 {
            bail!("pagination.page_size must be at least 1");
        }
        if !(pagination.scroll_threshold > 0.0 && pagination.scroll_threshold <= 1.0) {
            bail!(
                "pagination.scroll_threshold must be in (0, 1], got {}",
                pagination.scroll_threshold
            );
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
