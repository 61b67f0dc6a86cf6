//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use std::env;
use std::fmt;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Default storage backend kind provisioned on first boot: "filesystem" or "memory"
    pub storage_backend: String,

    /// Filesystem storage path (when storage_backend = "filesystem")
    pub storage_path: String,

    /// Optional capacity cap reported by the default backend, in bytes
    pub storage_capacity_bytes: Option<i64>,

    /// Transient storage failure retries before a job is marked failed
    pub storage_retry_attempts: u32,

    /// Base delay between storage retries, doubled per attempt
    pub storage_retry_base_delay_ms: u64,

    /// Advisory restore throughput used for time estimates, in MiB/s
    pub restore_throughput_mibs: u64,

    /// Seconds between retention sweep runs
    pub retention_sweep_interval_secs: u64,

    /// Seconds between due-schedule polls
    pub schedule_poll_interval_secs: u64,

    /// OTLP span exporter endpoint (optional)
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?,
            storage_backend: env::var("STORAGE_BACKEND").unwrap_or_else(|_| "filesystem".into()),
            storage_path: env::var("STORAGE_PATH")
                .unwrap_or_else(|_| "/var/lib/virtvault/backups".into()),
            storage_capacity_bytes: env::var("STORAGE_CAPACITY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok()),
            storage_retry_attempts: parse_or("STORAGE_RETRY_ATTEMPTS", 4),
            storage_retry_base_delay_ms: parse_or("STORAGE_RETRY_BASE_DELAY_MS", 250),
            restore_throughput_mibs: parse_or("RESTORE_THROUGHPUT_MIBS", 100),
            retention_sweep_interval_secs: parse_or("RETENTION_SWEEP_INTERVAL_SECS", 6 * 3600),
            schedule_poll_interval_secs: parse_or("SCHEDULE_POLL_INTERVAL_SECS", 300),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// The database URL carries credentials; keep it out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("storage_backend", &self.storage_backend)
            .field("storage_path", &self.storage_path)
            .field("storage_capacity_bytes", &self.storage_capacity_bytes)
            .field("storage_retry_attempts", &self.storage_retry_attempts)
            .field(
                "storage_retry_base_delay_ms",
                &self.storage_retry_base_delay_ms,
            )
            .field("restore_throughput_mibs", &self.restore_throughput_mibs)
            .field(
                "retention_sweep_interval_secs",
                &self.retention_sweep_interval_secs,
            )
            .field(
                "schedule_poll_interval_secs",
                &self.schedule_poll_interval_secs,
            )
            .field("otel_endpoint", &self.otel_endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_database_url() {
        let config = Config {
            database_url: "postgresql://user:secret@db/virtvault".into(),
            storage_backend: "filesystem".into(),
            storage_path: "/tmp/vv".into(),
            storage_capacity_bytes: None,
            storage_retry_attempts: 4,
            storage_retry_base_delay_ms: 250,
            restore_throughput_mibs: 100,
            retention_sweep_interval_secs: 21600,
            schedule_poll_interval_secs: 300,
            otel_endpoint: None,
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
