//! Hard-deletion paths: single message removal, channel purge, guild purge.
//!
//! Platform deletions and purges remove rows outright because the CDN URLs
//! backing the clips cannot be recovered; `deleted_at` archival is reserved
//! for operator-initiated soft deletes. Blob files are removed before their
//! database rows so a failed purge never strands orphaned objects behind
//! deleted rows.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use db::repositories::{
    ChannelRepository, ClipRepository, GuildRepository, MessageRepository,
    ScanRecoveryRepository, ScanStatusRepository, ThumbnailRepository,
};
use db::DBService;
use services::storage::StorageBackend;

use crate::error::WorkerError;
use crate::platform::PlatformClient;

#[derive(Debug, Default, Clone, Copy)]
pub struct PurgeStats {
    pub messages_deleted: u64,
    pub clips_deleted: u64,
    pub thumbnails_deleted: u64,
    pub files_deleted: u64,
    pub scan_status_deleted: u64,
    pub channels_purged: u64,
    pub guild_left: bool,
}

pub struct PurgeHandler {
    db: DBService,
    storage: Arc<dyn StorageBackend>,
    platform: Arc<dyn PlatformClient>,
    cooldown_minutes: f64,
}

impl PurgeHandler {
    pub fn new(
        db: DBService,
        storage: Arc<dyn StorageBackend>,
        platform: Arc<dyn PlatformClient>,
        cooldown_minutes: f64,
    ) -> Self {
        Self {
            db,
            storage,
            platform,
            cooldown_minutes,
        }
    }

    /// Remove blob files and thumbnail rows for one clip. File deletion is
    /// best-effort; the object may already be gone.
    async fn delete_clip_artifacts(&self, clip_id: &str) -> Result<(u64, u64), WorkerError> {
        let thumbnails = ThumbnailRepository::list_for_clip(&self.db.pool, clip_id).await?;

        let mut files_deleted = 0;
        for thumbnail in &thumbnails {
            match self.storage.delete(&thumbnail.storage_path).await {
                Ok(true) => {
                    files_deleted += 1;
                    debug!("Deleted thumbnail file {}", thumbnail.storage_path);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        "Failed to delete thumbnail file {}: {}",
                        thumbnail.storage_path, err
                    );
                }
            }
        }

        let rows_deleted = ThumbnailRepository::delete_for_clip(&self.db.pool, clip_id).await?;
        Ok((files_deleted, rows_deleted))
    }

    /// Handle a platform message deletion: drop the message, its clips and
    /// their thumbnails. Messages we never stored are a no-op.
    pub async fn delete_message(
        &self,
        message_id: &str,
        channel_id: &str,
    ) -> Result<PurgeStats, WorkerError> {
        let mut stats = PurgeStats::default();

        if MessageRepository::find_by_id(&self.db.pool, message_id)
            .await?
            .is_none()
        {
            debug!("Message {} not in database, skipping deletion", message_id);
            return Ok(stats);
        }

        let clips = ClipRepository::list_for_message(&self.db.pool, message_id).await?;
        info!(
            "Deleting message {} in channel {} with {} clip(s)",
            message_id,
            channel_id,
            clips.len()
        );

        for clip in &clips {
            let (files, thumbs) = self.delete_clip_artifacts(&clip.id).await?;
            stats.files_deleted += files;
            stats.thumbnails_deleted += thumbs;
        }

        stats.clips_deleted = ClipRepository::delete_for_message(&self.db.pool, message_id).await?;
        stats.messages_deleted = MessageRepository::delete_by_id(&self.db.pool, message_id).await?;

        info!(
            "Message deletion complete: message={}, clips={}, thumbnails={}, files={}",
            message_id, stats.clips_deleted, stats.thumbnails_deleted, stats.files_deleted
        );
        Ok(stats)
    }

    /// Purge all data for a channel and start its cooldown. The channel row
    /// itself survives so settings and scan toggles are retained.
    pub async fn purge_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<PurgeStats, WorkerError> {
        info!("Starting channel purge: guild={}, channel={}", guild_id, channel_id);
        let mut stats = PurgeStats::default();

        ScanRecoveryRepository::cancel_live_for_channel(
            &self.db.pool,
            guild_id,
            channel_id,
            "Scan stopped due to channel purge",
        )
        .await?;

        let clips = ClipRepository::list_for_channel(&self.db.pool, guild_id, channel_id).await?;
        info!("Found {} clips to purge for channel {}", clips.len(), channel_id);

        for clip in &clips {
            let (files, thumbs) = self.delete_clip_artifacts(&clip.id).await?;
            stats.files_deleted += files;
            stats.thumbnails_deleted += thumbs;
        }

        stats.clips_deleted =
            ClipRepository::delete_for_channel(&self.db.pool, guild_id, channel_id).await?;
        stats.messages_deleted =
            MessageRepository::delete_for_channel(&self.db.pool, guild_id, channel_id).await?;
        stats.scan_status_deleted =
            ScanStatusRepository::delete(&self.db.pool, guild_id, channel_id).await?;

        if self.cooldown_minutes > 0.0 {
            let until = Utc::now() + Duration::seconds((self.cooldown_minutes * 60.0) as i64);
            ChannelRepository::set_purge_cooldown(&self.db.pool, channel_id, Some(until)).await?;
            info!("Set purge cooldown for channel {} until {}", channel_id, until);
        } else {
            ChannelRepository::set_purge_cooldown(&self.db.pool, channel_id, None).await?;
        }

        info!(
            "Channel purge complete: channel={}, messages={}, clips={}, thumbnails={}, files={}, scan_status={}",
            channel_id,
            stats.messages_deleted,
            stats.clips_deleted,
            stats.thumbnails_deleted,
            stats.files_deleted,
            stats.scan_status_deleted
        );
        Ok(stats)
    }

    /// Purge all data for a guild, soft-delete it and leave the platform.
    pub async fn purge_guild(&self, guild_id: &str) -> Result<PurgeStats, WorkerError> {
        info!("Starting guild purge: guild={}", guild_id);
        let mut stats = PurgeStats::default();

        ScanRecoveryRepository::cancel_live_for_guild(
            &self.db.pool,
            guild_id,
            "Scan stopped due to guild purge",
        )
        .await?;

        let clips = ClipRepository::list_for_guild(&self.db.pool, guild_id).await?;
        info!("Found {} clips to purge for guild {}", clips.len(), guild_id);

        for clip in &clips {
            let (files, thumbs) = self.delete_clip_artifacts(&clip.id).await?;
            stats.files_deleted += files;
            stats.thumbnails_deleted += thumbs;
        }

        stats.clips_deleted = ClipRepository::delete_for_guild(&self.db.pool, guild_id).await?;
        stats.messages_deleted =
            MessageRepository::delete_for_guild(&self.db.pool, guild_id).await?;
        stats.scan_status_deleted =
            ScanRecoveryRepository::delete_for_guild(&self.db.pool, guild_id).await?;

        stats.channels_purged =
            ChannelRepository::delete_for_guild(&self.db.pool, guild_id).await?;
        GuildRepository::soft_delete(&self.db.pool, guild_id).await?;

        match self.platform.leave_guild(guild_id).await {
            Ok(()) => {
                stats.guild_left = true;
                info!("Left guild {}", guild_id);
            }
            Err(err) => {
                // Best effort; the bot may already be out of the guild.
                warn!("Failed to leave guild {}: {}", guild_id, err);
            }
        }

        info!(
            "Guild purge complete: guild={}, channels={}, messages={}, clips={}, thumbnails={}, files={}, left={}",
            guild_id,
            stats.channels_purged,
            stats.messages_deleted,
            stats.clips_deleted,
            stats.thumbnails_deleted,
            stats.files_deleted,
            stats.guild_left
        );
        Ok(stats)
    }
}
