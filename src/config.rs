//! Engine configuration, loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::Result;

/// Environment variable prefix, e.g. `SIEVELET_LEASE_SECONDS`.
pub const ENV_PREFIX: &str = "SIEVELET";

/// Tunables shared by the controller, worker loops, and watchdog.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How long a running item may go without an outcome before the watchdog
    /// reclaims its lease.
    #[serde(default = "EngineConfig::default_lease_seconds")]
    pub lease_seconds: u64,

    /// Per-item ceiling on failed attempts. An item gets up to
    /// `max_retries + 1` attempts in total.
    #[serde(default = "EngineConfig::default_max_retries")]
    pub max_retries: u32,

    /// Base backoff before re-claiming after a transient failure.
    #[serde(default = "EngineConfig::default_worker_backoff_base_ms")]
    pub worker_backoff_base_ms: u64,

    /// Factor by which the backoff grows with each retry.
    #[serde(default = "EngineConfig::default_worker_backoff_factor")]
    pub worker_backoff_factor: u64,

    /// Cap on the computed backoff.
    #[serde(default = "EngineConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How often the watchdog sweeps for expired leases.
    #[serde(default = "EngineConfig::default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Object-store root.
    #[serde(default = "EngineConfig::default_storage_bucket")]
    pub storage_bucket: PathBuf,

    /// Scoring endpoint for the HTTP analyzer. Required by the CLI `run`
    /// command; library users may inject any analyzer instead.
    #[serde(default)]
    pub analyzer_endpoint: Option<String>,

    /// Bearer token for the scoring endpoint. Empty disables the header.
    #[serde(default)]
    pub analyzer_api_key: String,

    /// Per-call timeout for the HTTP analyzer.
    #[serde(default = "EngineConfig::default_analyzer_timeout_ms")]
    pub analyzer_timeout_ms: u64,
}

impl EngineConfig {
    fn default_lease_seconds() -> u64 {
        90
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_worker_backoff_base_ms() -> u64 {
        2000
    }

    fn default_worker_backoff_factor() -> u64 {
        2
    }

    fn default_max_backoff_ms() -> u64 {
        32_000
    }

    fn default_watchdog_interval_ms() -> u64 {
        30_000
    }

    fn default_storage_bucket() -> PathBuf {
        PathBuf::from("sievelet-objects")
    }

    fn default_analyzer_timeout_ms() -> u64 {
        120_000
    }

    /// Load configuration from `SIEVELET_*` environment variables, falling
    /// back to the defaults above.
    pub fn from_env() -> Result<Self> {
        let config = Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// The watchdog lease as a chrono duration.
    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_seconds as i64)
    }

    /// Backoff before the attempt after `retry_count` failures:
    /// `base * factor^retry_count`, capped at `max_backoff_ms`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let ms = self
            .worker_backoff_base_ms
            .saturating_mul(self.worker_backoff_factor.saturating_pow(retry_count))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_seconds: Self::default_lease_seconds(),
            max_retries: Self::default_max_retries(),
            worker_backoff_base_ms: Self::default_worker_backoff_base_ms(),
            worker_backoff_factor: Self::default_worker_backoff_factor(),
            max_backoff_ms: Self::default_max_backoff_ms(),
            watchdog_interval_ms: Self::default_watchdog_interval_ms(),
            storage_bucket: Self::default_storage_bucket(),
            analyzer_endpoint: None,
            analyzer_api_key: String::new(),
            analyzer_timeout_ms: Self::default_analyzer_timeout_ms(),
        }
    }
}
