//! Periodic database liveness checks.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::DBService;

/// Failures in a row before the log level escalates from warn to error.
const ESCALATION_THRESHOLD: u32 = 3;

/// Run `SELECT 1` every `interval` until the shutdown flag flips.
pub async fn health_check_loop(
    db: DBService,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Starting DB health check loop (every {}s)",
        interval.as_secs()
    );

    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("DB health check loop stopped");
                    return;
                }
            }
        }

        match db.ping().await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    info!(
                        "DB health check recovered after {} failure(s)",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
                debug!("DB health check ok");
            }
            Err(err) => {
                consecutive_failures += 1;
                if consecutive_failures >= ESCALATION_THRESHOLD {
                    error!(
                        "DB health check failing ({} consecutive): {}",
                        consecutive_failures, err
                    );
                } else {
                    warn!("DB health check failed: {}", err);
                }
            }
        }
    }
}
