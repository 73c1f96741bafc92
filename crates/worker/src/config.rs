//! Worker configuration, read once at startup.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Messages pulled per group read.
    pub job_batch_size: usize,
    /// Block time for a group read.
    pub read_block_ms: usize,
    pub health_check_interval: Duration,
    pub stale_scan_interval: Duration,
    pub stale_scan_timeout_minutes: i64,
    pub purge_cooldown_minutes: f64,
    pub thumbnail_retry_batch: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_batch_size: 10,
            read_block_ms: 5000,
            health_check_interval: Duration::from_secs(60),
            stale_scan_interval: Duration::from_secs(300),
            stale_scan_timeout_minutes: 30,
            purge_cooldown_minutes: 5.0,
            thumbnail_retry_batch: 10,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            job_batch_size: env_parse("WORKER_JOB_BATCH_SIZE", defaults.job_batch_size),
            read_block_ms: defaults.read_block_ms,
            health_check_interval: Duration::from_secs(env_parse(
                "DB_HEALTH_CHECK_INTERVAL",
                defaults.health_check_interval.as_secs(),
            )),
            stale_scan_interval: Duration::from_secs(env_parse(
                "STALE_SCAN_CLEANUP_INTERVAL",
                defaults.stale_scan_interval.as_secs(),
            )),
            stale_scan_timeout_minutes: env_parse(
                "STALE_SCAN_TIMEOUT_MINUTES",
                defaults.stale_scan_timeout_minutes,
            ),
            purge_cooldown_minutes: env_parse(
                "PURGE_COOLDOWN_MINUTES",
                defaults.purge_cooldown_minutes,
            ),
            thumbnail_retry_batch: defaults.thumbnail_retry_batch,
        }
    }
}
