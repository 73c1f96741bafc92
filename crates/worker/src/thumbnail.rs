//! Thumbnail handler: media pipeline orchestration plus the per-clip
//! failure state machine.
//!
//! Failures land in `failed_thumbnails` with an escalating retry schedule;
//! the first success deletes the row. Clips stuck in `pending`/`processing`
//! are swept into the same machinery by the stale cleanup.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use db::models::{Clip, ThumbnailSizeType, ThumbnailState};
use db::repositories::{ClipRepository, FailedThumbnailRepository, ThumbnailRepository};
use db::DBService;
use services::media::{MediaArtifacts, MediaPipeline};

use crate::error::WorkerError;

/// Retry ladder in minutes, clamped to the last rung.
const BACKOFF_MINUTES: [i64; 6] = [5, 15, 60, 240, 720, 1440];

/// Delay before retry number `retry_count` (1-based).
pub fn backoff_delay(retry_count: i32) -> Duration {
    let index = ((retry_count - 1).max(0) as usize).min(BACKOFF_MINUTES.len() - 1);
    Duration::minutes(BACKOFF_MINUTES[index])
}

pub struct ThumbnailHandler {
    db: DBService,
    pipeline: MediaPipeline,
    retry_batch: i64,
}

impl ThumbnailHandler {
    pub fn new(db: DBService, pipeline: MediaPipeline, retry_batch: i64) -> Self {
        Self {
            db,
            pipeline,
            retry_batch,
        }
    }

    /// Generate and persist both thumbnails for a clip. Returns whether the
    /// clip ended up completed; failures are recorded on the backoff
    /// schedule rather than propagated.
    pub async fn process_clip(&self, clip: &Clip) -> bool {
        info!("Processing thumbnails for clip {}", clip.id);

        match self.try_process(clip).await {
            Ok(_) => true,
            Err(err) => {
                error!("Failed to process thumbnails for clip {}: {}", clip.id, err);
                self.record_failure(&clip.id, &err.to_string()).await;
                false
            }
        }
    }

    /// Returns Ok(false) when the short-circuit fired (artifacts and row
    /// already agree), Ok(true) after a full regeneration.
    async fn try_process(&self, clip: &Clip) -> Result<bool, WorkerError> {
        let artifacts_exist = self
            .pipeline
            .artifacts_exist(&clip.guild_id, &clip.id)
            .await?;

        if clip.thumbnail_status == ThumbnailState::Completed {
            if artifacts_exist {
                return Ok(false);
            }
            // DB/blob divergence: the row claims completion but objects are
            // missing. Regenerate.
            warn!(
                "Clip {} marked completed but blobs are missing; regenerating",
                clip.id
            );
        }

        ClipRepository::set_thumbnail_status(&self.db.pool, &clip.id, ThumbnailState::Processing)
            .await?;

        let artifacts = self
            .pipeline
            .generate(&clip.guild_id, &clip.id, &clip.cdn_url)
            .await?;

        self.persist_success(clip, &artifacts).await?;
        Ok(true)
    }

    async fn persist_success(
        &self,
        clip: &Clip,
        artifacts: &MediaArtifacts,
    ) -> Result<(), WorkerError> {
        ThumbnailRepository::upsert(
            &self.db.pool,
            &clip.id,
            ThumbnailSizeType::Small,
            &artifacts.small.storage_path,
            artifacts.small.width as i32,
            artifacts.small.height as i32,
            artifacts.small.file_size as i64,
            "image/webp",
        )
        .await?;
        ThumbnailRepository::upsert(
            &self.db.pool,
            &clip.id,
            ThumbnailSizeType::Large,
            &artifacts.large.storage_path,
            artifacts.large.width as i32,
            artifacts.large.height as i32,
            artifacts.large.file_size as i64,
            "image/webp",
        )
        .await?;

        ClipRepository::complete_with_metadata(
            &self.db.pool,
            &clip.id,
            artifacts.mime_type.as_deref(),
            artifacts.duration,
            artifacts.resolution.as_deref(),
        )
        .await?;

        FailedThumbnailRepository::delete_for_clip(&self.db.pool, &clip.id).await?;

        info!(
            "Thumbnails complete for clip {}: {} ({} bytes), {} ({} bytes)",
            clip.id,
            artifacts.small.storage_path,
            artifacts.small.file_size,
            artifacts.large.storage_path,
            artifacts.large.file_size
        );
        Ok(())
    }

    /// Flip the clip to `failed` and schedule the next retry.
    async fn record_failure(&self, clip_id: &str, error_message: &str) {
        if let Err(err) =
            ClipRepository::set_thumbnail_status(&self.db.pool, clip_id, ThumbnailState::Failed)
                .await
        {
            error!("Could not mark clip {} failed: {}", clip_id, err);
        }

        let attempt = match FailedThumbnailRepository::find_for_clip(&self.db.pool, clip_id).await {
            Ok(existing) => existing.map(|row| row.retry_count + 1).unwrap_or(1),
            Err(err) => {
                error!("Could not read failure record for {}: {}", clip_id, err);
                1
            }
        };
        let next_retry_at = Utc::now() + backoff_delay(attempt);

        match FailedThumbnailRepository::record_failure(
            &self.db.pool,
            clip_id,
            error_message,
            next_retry_at,
        )
        .await
        {
            Ok(row) => info!(
                "Recorded thumbnail failure for clip {}: retry #{} at {}",
                clip_id, row.retry_count, row.next_retry_at
            ),
            Err(err) => error!("Could not record failure for {}: {}", clip_id, err),
        }
    }

    /// Process due failed-thumbnail rows, optionally restricted to specific
    /// clips. Returns how many succeeded.
    pub async fn retry_failed(&self, clip_ids: Option<&[String]>) -> Result<u64, WorkerError> {
        let due = FailedThumbnailRepository::due(
            &self.db.pool,
            Utc::now(),
            self.retry_batch,
            clip_ids,
        )
        .await?;

        if due.is_empty() {
            info!("No failed thumbnails due for retry");
            return Ok(0);
        }
        info!("Found {} failed thumbnail(s) due for retry", due.len());

        let mut succeeded = 0;
        for failure in &due {
            let clip = match ClipRepository::find_by_id(&self.db.pool, &failure.clip_id).await? {
                Some(clip) => clip,
                None => {
                    // The clip was purged out from under the failure record.
                    warn!("Clip {} no longer exists; dropping retry row", failure.clip_id);
                    FailedThumbnailRepository::delete_for_clip(&self.db.pool, &failure.clip_id)
                        .await?;
                    continue;
                }
            };

            info!(
                "Retrying thumbnail generation for clip {} (attempt #{})",
                clip.id,
                failure.retry_count + 1
            );
            if self.process_clip(&clip).await {
                succeeded += 1;
            }
        }

        info!("Retry batch complete: {}/{} successful", succeeded, due.len());
        Ok(succeeded)
    }

    /// Clips stuck mid-pipeline past the cutoff become `failed` with a
    /// retry row so the backoff machinery picks them up.
    pub async fn recover_stale_clips(&self, cutoff: DateTime<Utc>) -> Result<u64, WorkerError> {
        let stale = ClipRepository::find_stale_processing(&self.db.pool, cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        warn!("Found {} clip(s) stuck in thumbnail processing", stale.len());
        for clip in &stale {
            self.record_failure(&clip.id, "Thumbnail generation stalled; rescheduled")
                .await;
        }
        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_matches_the_schedule() {
        assert_eq!(backoff_delay(1), Duration::minutes(5));
        assert_eq!(backoff_delay(2), Duration::minutes(15));
        assert_eq!(backoff_delay(3), Duration::minutes(60));
        assert_eq!(backoff_delay(4), Duration::minutes(240));
        assert_eq!(backoff_delay(5), Duration::minutes(720));
        assert_eq!(backoff_delay(6), Duration::minutes(1440));
    }

    #[test]
    fn backoff_clamps_to_the_last_rung() {
        assert_eq!(backoff_delay(7), Duration::minutes(1440));
        assert_eq!(backoff_delay(100), Duration::minutes(1440));
        // Counts below 1 clamp to the first rung.
        assert_eq!(backoff_delay(0), Duration::minutes(5));
    }
}
