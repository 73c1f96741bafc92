//! Worker host: consumes the job streams and dispatches by job kind.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use db::models::ScanState;
use db::repositories::{ScanRecoveryRepository, ScanStatusRepository};
use db::DBService;
use services::jobs::Job;
use services::media::{MediaConfig, MediaPipeline};
use services::queue::StreamQueue;
use services::settings::SettingsResolver;
use services::storage::storage_from_env;

mod batch;
mod config;
mod error;
mod platform;
mod processor;
mod purge;
mod thumbnail;

use batch::BatchProcessor;
use config::WorkerConfig;
use platform::{serenity_client::SerenityPlatform, PlatformClient};
use processor::JobProcessor;
use purge::PurgeHandler;
use thumbnail::ThumbnailHandler;

const CONSUMER_GROUP: &str = "worker_group";

fn consumer_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    format!("worker_{host}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,worker={level},services={level},db={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config = WorkerConfig::from_env();
    let consumer = consumer_name();
    info!("Worker initializing (consumer: {})", consumer);

    let db = DBService::new().await.context("database init failed")?;
    let storage = storage_from_env().context("storage init failed")?;
    let queue = Arc::new(
        StreamQueue::connect("*", Some(CONSUMER_GROUP), Some(&consumer))
            .await
            .context("redis init failed")?,
    );

    let token = std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is required")?;
    let platform: Arc<dyn PlatformClient> = Arc::new(SerenityPlatform::new(&token));

    let settings = Arc::new(SettingsResolver::new(db.pool.clone()));
    let media = MediaPipeline::new(storage.clone(), MediaConfig::from_env())
        .context("media pipeline init failed")?;
    let thumbnails = Arc::new(ThumbnailHandler::new(
        db.clone(),
        media,
        config.thumbnail_retry_batch,
    ));
    let batch = BatchProcessor::new(
        db.clone(),
        settings.clone(),
        platform.clone(),
        thumbnails.clone(),
    );
    let purge = PurgeHandler::new(
        db.clone(),
        storage.clone(),
        platform.clone(),
        config.purge_cooldown_minutes,
    );
    let processor = JobProcessor::new(
        db.clone(),
        queue.clone(),
        platform.clone(),
        batch,
        thumbnails.clone(),
        purge,
    );

    info!("Worker components initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let health_handle = tokio::spawn(db::health::health_check_loop(
        db.clone(),
        config.health_check_interval,
        shutdown_rx.clone(),
    ));
    let stale_handle = tokio::spawn(stale_scan_loop(
        db.clone(),
        thumbnails.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));

    run_worker_loop(&queue, &processor, &db, &config, shutdown_rx).await;

    info!("Shutting down worker...");
    health_handle.abort();
    stale_handle.abort();
    db.close().await;
    info!("Worker shutdown complete");
    Ok(())
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });
}

/// Cancel scans stuck in a live state and reschedule clips stuck
/// mid-thumbnail.
async fn stale_scan_loop(
    db: DBService,
    thumbnails: Arc<ThumbnailHandler>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Starting stale scan cleanup loop (check every {}s, timeout: {}m)",
        config.stale_scan_interval.as_secs(),
        config.stale_scan_timeout_minutes
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.stale_scan_interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Stale scan cleanup loop stopped");
                    return;
                }
            }
        }

        let cutoff = Utc::now() - ChronoDuration::minutes(config.stale_scan_timeout_minutes);

        match ScanRecoveryRepository::cancel_stale(
            &db.pool,
            cutoff,
            "Scan timed out - stuck in a live status for too long. \
             This usually indicates a worker crash or job failure. Please retry the scan.",
        )
        .await
        {
            Ok(recovered) if recovered > 0 => {
                info!("Stale scan cleanup: recovered {} stuck scans", recovered)
            }
            Ok(_) => {}
            Err(err) => error!("Error in stale scan cleanup: {}", err),
        }

        if let Err(err) = thumbnails.recover_stale_clips(cutoff).await {
            error!("Error in stale thumbnail cleanup: {}", err);
        }
    }
}

async fn run_worker_loop(
    queue: &StreamQueue,
    processor: &JobProcessor,
    db: &DBService,
    config: &WorkerConfig,
    shutdown: watch::Receiver<bool>,
) {
    info!("Starting job processing loop...");

    while !*shutdown.borrow() {
        let jobs = match queue.read_jobs(config.job_batch_size, config.read_block_ms).await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!("Error reading from job streams: {}", err);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        for queued in jobs {
            let job_id = queued.job.job_id().unwrap_or("unknown").to_string();
            info!(
                "Processing job {} (type: {}) from stream {}",
                job_id,
                queued.job.job_type(),
                queued.stream_name
            );

            match processor.process_job(&queued.job).await {
                Ok(()) => {
                    if let Err(err) = queue.acknowledge(&queued.stream_name, &queued.message_id).await
                    {
                        error!("Failed to acknowledge job {}: {}", job_id, err);
                    } else {
                        info!("Job {} completed successfully", job_id);
                    }
                }
                Err(err) => {
                    error!("Job {} failed: {}", job_id, err);

                    // Batch scans get their status parked so operators see
                    // the retry cycle rather than a scan stuck in running.
                    if let Job::Batch(batch_job) = &queued.job {
                        let reason: String = format!("Job failed and will be retried: {err}")
                            .chars()
                            .take(200)
                            .collect();
                        if let Err(status_err) = ScanStatusRepository::set_status(
                            &db.pool,
                            &batch_job.guild_id,
                            &batch_job.channel_id,
                            ScanState::Cancelled,
                            Some(&reason),
                        )
                        .await
                        {
                            error!("Failed to mark scan cancelled: {}", status_err);
                        }
                    }

                    // Not acknowledged: the entry stays pending and is
                    // reclaimed by another worker after the idle timeout.
                    warn!("Job {} left pending for retry", job_id);
                }
            }
        }
    }

    info!("Job processing loop stopped");
}
