//! Configuration for the sync runtime.

use std::env;
use std::time::Duration;

/// Sync runtime configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the mutation service
    pub base_url: String,
    /// Per-request network timeout; a timeout is a retryable failure
    pub request_timeout: Duration,
    /// First retry delay
    pub backoff_min: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
    /// Maximum interval between precondition re-checks for parked tasks
    pub poll_interval: Duration,
    /// Bound on concurrently running sync attempts across identifiers
    pub max_concurrent_syncs: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "https://device-api.loft.example".to_string(),
            request_timeout: Duration::from_secs(30),
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(120),
            poll_interval: Duration::from_secs(60),
            max_concurrent_syncs: 4,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = env::var("LOFT_BASE_URL").unwrap_or(defaults.base_url);

        let request_timeout = parse_secs("LOFT_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?;
        let backoff_min = parse_secs("LOFT_BACKOFF_MIN_SECS", defaults.backoff_min)?;
        let backoff_max = parse_secs("LOFT_BACKOFF_MAX_SECS", defaults.backoff_max)?;
        let poll_interval = parse_secs("LOFT_POLL_INTERVAL_SECS", defaults.poll_interval)?;

        if backoff_min.is_zero() || backoff_min > backoff_max {
            return Err(ConfigError::InvalidBackoffRange);
        }

        let max_concurrent_syncs = match env::var("LOFT_MAX_CONCURRENT_SYNCS") {
            Err(_) => defaults.max_concurrent_syncs,
            Ok(raw) => raw
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .ok_or(ConfigError::InvalidConcurrency)?,
        };

        Ok(Self {
            base_url,
            request_timeout,
            backoff_min,
            backoff_max,
            poll_interval,
            max_concurrent_syncs,
        })
    }
}

fn parse_secs(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidDuration(var.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration in {0}")]
    InvalidDuration(String),

    #[error("backoff minimum must be positive and no greater than the maximum")]
    InvalidBackoffRange,

    #[error("LOFT_MAX_CONCURRENT_SYNCS must be a positive integer")]
    InvalidConcurrency,
}
