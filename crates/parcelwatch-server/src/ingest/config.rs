//! Ingestion configuration
//!
//! Tuning knobs for the upload pipeline and the stuck-job monitor. Batch
//! sizes are bounded so a single pipeline pass makes visible progress well
//! inside the platform's wall-clock ceiling, with progress persisted between
//! batches.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of staging rows per bulk insert.
pub const DEFAULT_STAGING_BATCH_SIZE: usize = 500;

/// Default number of violations per bulk insert.
pub const DEFAULT_VIOLATION_BATCH_SIZE: usize = 500;

/// Default age after which a non-terminal job is considered stuck and
/// reprocessed (3 minutes).
pub const DEFAULT_STUCK_AFTER_SECS: u64 = 180;

/// Default age after which a job is flagged as stuck in the list API
/// without being touched (1 hour).
pub const DEFAULT_STUCK_FLAG_AFTER_SECS: u64 = 3600;

/// Default sweep interval for the stuck-job monitor.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Cap on non-fatal warnings persisted per job.
pub const DEFAULT_MAX_WARNINGS: usize = 25;

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Whether the background stuck-job monitor runs
    pub monitor_enabled: bool,
    /// Staging rows per bulk insert
    pub staging_batch_size: usize,
    /// Violations per bulk insert
    pub violation_batch_size: usize,
    /// Age at which the monitor reprocesses a non-terminal job
    pub stuck_after_secs: u64,
    /// Age at which the list API flags a job as stuck
    pub stuck_flag_after_secs: u64,
    /// Monitor sweep interval
    pub sweep_interval_secs: u64,
    /// Cap on persisted per-job warnings
    pub max_warnings: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            monitor_enabled: true,
            staging_batch_size: DEFAULT_STAGING_BATCH_SIZE,
            violation_batch_size: DEFAULT_VIOLATION_BATCH_SIZE,
            stuck_after_secs: DEFAULT_STUCK_AFTER_SECS,
            stuck_flag_after_secs: DEFAULT_STUCK_FLAG_AFTER_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_warnings: DEFAULT_MAX_WARNINGS,
        }
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            monitor_enabled: std::env::var("INGEST_MONITOR_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            staging_batch_size: std::env::var("INGEST_STAGING_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STAGING_BATCH_SIZE),
            violation_batch_size: std::env::var("INGEST_VIOLATION_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_VIOLATION_BATCH_SIZE),
            stuck_after_secs: std::env::var("INGEST_STUCK_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STUCK_AFTER_SECS),
            stuck_flag_after_secs: std::env::var("INGEST_STUCK_FLAG_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STUCK_FLAG_AFTER_SECS),
            sweep_interval_secs: std::env::var("INGEST_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            max_warnings: std::env::var("INGEST_MAX_WARNINGS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_WARNINGS),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.staging_batch_size == 0 {
            anyhow::bail!("staging_batch_size must be greater than 0");
        }
        if self.violation_batch_size == 0 {
            anyhow::bail!("violation_batch_size must be greater than 0");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_batch_size, 500);
        assert_eq!(config.stuck_after_secs, 180);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = IngestConfig {
            staging_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
