//! Worker configuration loaded from environment variables.

use std::time::Duration;

use store::{Backoff, RetryPolicy};

/// Worker loop configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `WORKER_POLL_INTERVAL_SECS` — sleep between empty batches (default: `1.5`)
/// - `WORKER_BATCH_SIZE` — events claimed per pass (default: `10`)
/// - `WORKER_MAX_ATTEMPTS` — attempts before dead-lettering (default: `8`)
/// - `WORKER_BACKOFF_BASE_SECS` — backoff base (default: `2`)
/// - `WORKER_BACKOFF_CAP_SECS` — backoff cap (default: `60`)
///
/// Configuration is passed into each component at construction, so tests
/// can run workers with distinct settings in the same process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_secs("WORKER_POLL_INTERVAL_SECS", defaults.poll_interval),
            batch_size: env_parse("WORKER_BATCH_SIZE", defaults.batch_size),
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base: env_secs("WORKER_BACKOFF_BASE_SECS", defaults.backoff_base),
            backoff_cap: env_secs("WORKER_BACKOFF_CAP_SECS", defaults.backoff_cap),
        }
    }

    /// Returns the retry policy applied to failed deliveries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Backoff {
                base: self.backoff_base,
                cap: self.backoff_cap,
            },
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            batch_size: 10,
            max_attempts: 8,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}
