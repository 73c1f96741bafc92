//! Job dispatch and the channel-scan scheduler.
//!
//! A batch scan drives one page of channel history through validation, the
//! duplicate policy, the batch processor and the scan-status FSM, then
//! decides whether to enqueue a continuation. Platform failures transition
//! the scan to `failed` and consume the job; infrastructure failures
//! propagate so the queue entry stays pending and is retried by another
//! worker.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use db::models::ScanState;
use db::repositories::{
    AuthorRepository, ChannelRepository, GuildRepository, MessageRepository,
    ScanStatusRepository,
};
use db::DBService;
use services::jobs::{
    BatchScanJob, Job, MessageDeletionJob, MessageScanJob, PurgeChannelJob, PurgeGuildJob,
    RescanJob, RescanMode, ScanDirection, ThumbnailRetryJob,
};
use services::queue::StreamQueue;

use crate::batch::BatchProcessor;
use crate::error::WorkerError;
use crate::platform::{
    fetch_history_page, retry, HistoryQuery, PlatformClient, PlatformError, PlatformMessage,
};
use crate::purge::PurgeHandler;
use crate::thumbnail::ThumbnailHandler;

/// Wide page size used when a settings-change rescan is upgraded to a full
/// walk.
const RESCAN_PAGE_LIMIT: u32 = 1000;

fn snowflake_value(id: &str) -> u128 {
    id.parse().unwrap_or(0)
}

/// Oldest and newest ids in a page, by snowflake order. Empty pages have no
/// extremes.
pub(crate) fn page_extremes(messages: &[PlatformMessage]) -> Option<(String, String)> {
    let oldest = messages.iter().min_by_key(|m| snowflake_value(&m.id))?;
    let newest = messages.iter().max_by_key(|m| snowflake_value(&m.id))?;
    Some((oldest.id.clone(), newest.id.clone()))
}

/// Partition a page against the already-stored ids according to the rescan
/// policy. Returns the messages to process and whether the scan should stop
/// at this page because it hit known territory.
pub(crate) fn apply_rescan_policy(
    messages: Vec<PlatformMessage>,
    existing_ids: &HashSet<String>,
    mode: RescanMode,
) -> (Vec<PlatformMessage>, bool) {
    if existing_ids.is_empty() {
        return (messages, false);
    }

    match mode {
        RescanMode::Update => (messages, false),
        RescanMode::Stop => {
            let total = messages.len();
            let fresh: Vec<PlatformMessage> = messages
                .into_iter()
                .filter(|m| !existing_ids.contains(&m.id))
                .collect();
            let stopped = fresh.len() < total;
            (fresh, stopped)
        }
        RescanMode::Continue => {
            let fresh = messages
                .into_iter()
                .filter(|m| !existing_ids.contains(&m.id))
                .collect();
            (fresh, false)
        }
    }
}

/// A full page that didn't stop on known messages keeps the walk going.
pub(crate) fn continuation_needed(fetched: usize, limit: u32, stopped_on_duplicate: bool) -> bool {
    fetched >= limit as usize && !stopped_on_duplicate
}

/// Continuation job cursored at the page edge matching the direction.
pub(crate) fn continuation_for(job: &BatchScanJob, oldest: &str, newest: &str) -> BatchScanJob {
    let mut next = job.clone();
    next.job_id = None;
    next.created_at = None;
    match job.direction {
        ScanDirection::Backward => next.before_message_id = Some(oldest.to_string()),
        ScanDirection::Forward => next.after_message_id = Some(newest.to_string()),
    }
    next
}

pub struct JobProcessor {
    db: DBService,
    queue: Arc<StreamQueue>,
    platform: Arc<dyn PlatformClient>,
    batch: BatchProcessor,
    thumbnails: Arc<ThumbnailHandler>,
    purge: PurgeHandler,
}

impl JobProcessor {
    pub fn new(
        db: DBService,
        queue: Arc<StreamQueue>,
        platform: Arc<dyn PlatformClient>,
        batch: BatchProcessor,
        thumbnails: Arc<ThumbnailHandler>,
        purge: PurgeHandler,
    ) -> Self {
        Self {
            db,
            queue,
            platform,
            batch,
            thumbnails,
            purge,
        }
    }

    pub async fn process_job(&self, job: &Job) -> Result<(), WorkerError> {
        match job {
            Job::Batch(batch_job) => self.process_batch_scan(batch_job).await,
            Job::Message(message_job) => self.process_message_scan(message_job).await,
            Job::Rescan(rescan_job) => self.process_rescan(rescan_job).await,
            Job::ThumbnailRetry(retry_job) => self.process_thumbnail_retry(retry_job).await,
            Job::MessageDeletion(deletion_job) => {
                self.process_message_deletion(deletion_job).await
            }
            Job::PurgeChannel(purge_job) => self.process_purge_channel(purge_job).await,
            Job::PurgeGuild(purge_job) => self.process_purge_guild(purge_job).await,
        }
    }

    /// Scanning is gated on the guild flag, the channel flag, and a
    /// message-bearing channel type.
    async fn validate_scan_enabled(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Result<(), String>, sqlx::Error> {
        let Some(guild) = GuildRepository::find_by_id(&self.db.pool, guild_id).await? else {
            return Ok(Err("Guild not found in database".into()));
        };
        if !guild.message_scan_enabled {
            return Ok(Err("Guild scanning disabled".into()));
        }

        let Some(channel) = ChannelRepository::find_by_id(&self.db.pool, channel_id).await? else {
            return Ok(Err("Channel not found in database".into()));
        };
        if !channel.message_scan_enabled {
            return Ok(Err("Channel scanning disabled for this channel".into()));
        }
        if !channel.kind.is_scannable() {
            return Ok(Err("Cannot scan category channels".into()));
        }

        Ok(Ok(()))
    }

    async fn set_scan_failed(
        &self,
        guild_id: &str,
        channel_id: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        error!("Scan failed for channel {}: {}", channel_id, reason);
        ScanStatusRepository::set_status(
            &self.db.pool,
            guild_id,
            channel_id,
            ScanState::Failed,
            Some(reason),
        )
        .await
    }

    pub async fn process_batch_scan(&self, job: &BatchScanJob) -> Result<(), WorkerError> {
        let guild_id = &job.guild_id;
        let channel_id = &job.channel_id;

        info!(
            "Processing batch scan: channel={}, direction={:?}, limit={}, rescan={:?}",
            channel_id, job.direction, job.limit, job.rescan
        );

        let scan_status =
            ScanStatusRepository::get_or_create(&self.db.pool, guild_id, channel_id).await?;

        match self.validate_scan_enabled(guild_id, channel_id).await? {
            Ok(()) => {}
            Err(reason) => {
                warn!("Scan cancelled for channel {}: {}", channel_id, reason);
                ScanStatusRepository::set_status(
                    &self.db.pool,
                    guild_id,
                    channel_id,
                    ScanState::Cancelled,
                    Some(&reason),
                )
                .await?;
                return Ok(());
            }
        }

        ScanStatusRepository::set_status(
            &self.db.pool,
            guild_id,
            channel_id,
            ScanState::Running,
            None,
        )
        .await?;

        // Platform-side failures consume the job with an explicit reason;
        // anything else bubbles so the queue entry stays pending.
        let channel = match self.platform.fetch_channel(channel_id).await {
            Ok(channel) => channel,
            Err(PlatformError::Forbidden(_)) => {
                self.set_scan_failed(
                    guild_id,
                    channel_id,
                    "Bot does not have permission to access this channel",
                )
                .await?;
                return Ok(());
            }
            Err(PlatformError::NotFound(_)) => {
                self.set_scan_failed(guild_id, channel_id, "Channel not found or no longer exists")
                    .await?;
                return Ok(());
            }
            Err(err) => {
                self.set_scan_failed(guild_id, channel_id, &format!("Platform API error: {err}"))
                    .await?;
                return Ok(());
            }
        };

        if !channel.supports_history {
            self.set_scan_failed(
                guild_id,
                channel_id,
                &format!("Channel type '{:?}' does not support message scanning", channel.kind),
            )
            .await?;
            return Ok(());
        }

        let query = HistoryQuery {
            direction: job.direction,
            limit: job.limit,
            before: job.before_message_id.clone(),
            after: job.after_message_id.clone(),
        };
        let messages = match fetch_history_page(self.platform.as_ref(), channel_id, &query).await {
            Ok(messages) => messages,
            Err(PlatformError::Forbidden(_)) => {
                self.set_scan_failed(
                    guild_id,
                    channel_id,
                    "Bot does not have permission to read message history in this channel",
                )
                .await?;
                return Ok(());
            }
            Err(err) => {
                self.set_scan_failed(
                    guild_id,
                    channel_id,
                    &format!("Platform API error reading history: {err}"),
                )
                .await?;
                return Ok(());
            }
        };

        info!("Fetched {} messages from channel {}", messages.len(), channel_id);

        match self
            .run_scan_page(job, scan_status.is_first_scan(), messages)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.set_scan_failed(guild_id, channel_id, &err.to_string())
                    .await?;
                Err(err)
            }
        }
    }

    /// Process one fetched page: duplicate policy, batch upserts, cursor
    /// advancement, counters, continuation.
    async fn run_scan_page(
        &self,
        job: &BatchScanJob,
        is_first_scan: bool,
        messages: Vec<PlatformMessage>,
    ) -> Result<(), WorkerError> {
        let guild_id = &job.guild_id;
        let channel_id = &job.channel_id;
        let fetched = messages.len();
        let extremes = page_extremes(&messages);

        let existing_ids = if messages.is_empty() {
            HashSet::new()
        } else {
            let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
            MessageRepository::existing_ids(&self.db.pool, channel_id, &ids).await?
        };
        if !existing_ids.is_empty() {
            info!(
                "Found {} already-processed messages out of {} (rescan mode: {:?})",
                existing_ids.len(),
                fetched,
                job.rescan
            );
        }

        // Update rescans preload the guild's authors so stale rows refresh.
        let existing_author_ids = if job.rescan == RescanMode::Update {
            AuthorRepository::ids_for_guild(&self.db.pool, guild_id).await?
        } else {
            HashSet::new()
        };

        let (to_process, stopped_on_duplicate) =
            apply_rescan_policy(messages, &existing_ids, job.rescan);

        let outcome = self
            .batch
            .process_batch(
                &to_process,
                guild_id,
                channel_id,
                existing_author_ids,
                job.rescan == RescanMode::Update,
            )
            .await?;

        ScanStatusRepository::increment_counts(
            &self.db.pool,
            guild_id,
            channel_id,
            to_process.len() as i64,
            outcome.clips_found as i64,
        )
        .await?;

        let mut needs_continuation = false;
        if let Some((oldest, newest)) = &extremes {
            // The first successful page sets both boundaries; continuations
            // advance only the edge matching the direction.
            let (forward, backward) = if is_first_scan {
                (Some(newest.as_str()), Some(oldest.as_str()))
            } else {
                match job.direction {
                    ScanDirection::Backward => (None, Some(oldest.as_str())),
                    ScanDirection::Forward => (Some(newest.as_str()), None),
                }
            };
            ScanStatusRepository::set_cursors(&self.db.pool, guild_id, channel_id, forward, backward)
                .await?;

            needs_continuation = continuation_needed(fetched, job.limit, stopped_on_duplicate);
        }

        if needs_continuation && job.auto_continue {
            let (oldest, newest) = extremes.as_ref().expect("non-empty page has extremes");
            info!(
                "Queueing continuation job for channel {} (direction: {:?})",
                channel_id, job.direction
            );
            let continuation = Job::Batch(continuation_for(job, oldest, newest)).with_identity();
            self.queue.push_job(&continuation).await?;

            ScanStatusRepository::set_status(
                &self.db.pool,
                guild_id,
                channel_id,
                ScanState::Running,
                None,
            )
            .await?;
        } else {
            ScanStatusRepository::set_status(
                &self.db.pool,
                guild_id,
                channel_id,
                ScanState::Succeeded,
                None,
            )
            .await?;
            GuildRepository::mark_scanned(&self.db.pool, guild_id).await?;

            if stopped_on_duplicate {
                info!(
                    "Batch scan stopped - reached already-scanned messages (rescan mode: {:?})",
                    job.rescan
                );
            } else if needs_continuation {
                info!("Batch scan complete but auto_continue=false, not queueing continuation");
            }
        }

        info!(
            "Batch scan complete: processed {} messages (of {} fetched), found {} clips",
            to_process.len(),
            fetched,
            outcome.clips_found
        );
        Ok(())
    }

    /// Real-time message scan: fetch the named messages and run them through
    /// the batch processor. Disabled channels are skipped silently.
    pub async fn process_message_scan(&self, job: &MessageScanJob) -> Result<(), WorkerError> {
        let guild_id = &job.guild_id;
        let channel_id = &job.channel_id;

        info!(
            "Processing message scan: channel={}, messages={}",
            channel_id,
            job.message_ids.len()
        );

        if let Err(reason) = self.validate_scan_enabled(guild_id, channel_id).await? {
            debug!("Scan disabled for channel {}: {}", channel_id, reason);
            return Ok(());
        }

        let retry_config = retry::PlatformRetryConfig::default();
        let mut messages = Vec::new();
        for message_id in &job.message_ids {
            let fetched = retry::execute_with_retry(&retry_config, || {
                self.platform.fetch_message(channel_id, message_id)
            })
            .await;
            match fetched {
                Ok(message) => messages.push(message),
                Err(err) => {
                    // Per-message failures do not abort the job.
                    error!("Failed to fetch message {}: {}", message_id, err);
                }
            }
        }

        let outcome = self
            .batch
            .process_batch(&messages, guild_id, channel_id, HashSet::new(), false)
            .await?;

        // Raise the forward cursor past what we just processed so a later
        // gap scan does not re-walk these messages.
        if let Some((_, newest)) = page_extremes(&messages) {
            ScanStatusRepository::get_or_create(&self.db.pool, guild_id, channel_id).await?;
            ScanStatusRepository::advance_forward_if_newer(
                &self.db.pool,
                guild_id,
                channel_id,
                &newest,
            )
            .await?;
        }

        info!(
            "Message scan complete: processed {} messages, found {} clips",
            messages.len(),
            outcome.clips_found
        );
        Ok(())
    }

    /// Settings-change rescan: upgraded to a wide backward walk that
    /// refreshes known messages.
    pub async fn process_rescan(&self, job: &RescanJob) -> Result<(), WorkerError> {
        info!(
            "Processing rescan: channel={}, reason={}",
            job.channel_id,
            job.reason.as_deref().unwrap_or("unknown")
        );

        self.process_batch_scan(&BatchScanJob {
            guild_id: job.guild_id.clone(),
            channel_id: job.channel_id.clone(),
            direction: ScanDirection::Backward,
            limit: RESCAN_PAGE_LIMIT,
            before_message_id: None,
            after_message_id: None,
            auto_continue: true,
            rescan: RescanMode::Update,
            job_id: None,
            created_at: None,
        })
        .await
    }

    pub async fn process_thumbnail_retry(&self, job: &ThumbnailRetryJob) -> Result<(), WorkerError> {
        match &job.clip_ids {
            Some(clip_ids) => {
                info!("Processing thumbnail retry for {} specific clip(s)", clip_ids.len())
            }
            None => info!("Processing thumbnail retry (all eligible clips)"),
        }

        let succeeded = self.thumbnails.retry_failed(job.clip_ids.as_deref()).await?;
        info!("Thumbnail retry complete: {} thumbnails generated", succeeded);
        Ok(())
    }

    pub async fn process_message_deletion(
        &self,
        job: &MessageDeletionJob,
    ) -> Result<(), WorkerError> {
        self.purge
            .delete_message(&job.message_id, &job.channel_id)
            .await?;
        Ok(())
    }

    pub async fn process_purge_channel(&self, job: &PurgeChannelJob) -> Result<(), WorkerError> {
        self.purge
            .purge_channel(&job.guild_id, &job.channel_id)
            .await?;
        Ok(())
    }

    pub async fn process_purge_guild(&self, job: &PurgeGuildJob) -> Result<(), WorkerError> {
        self.purge.purge_guild(&job.guild_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformUser;
    use chrono::Utc;

    fn message(id: &str) -> PlatformMessage {
        PlatformMessage {
            id: id.into(),
            author: PlatformUser {
                id: "u1".into(),
                username: "user".into(),
                discriminator: None,
                display_name: "user".into(),
                avatar_url: None,
            },
            content: String::new(),
            timestamp: Utc::now(),
            attachments: vec![],
        }
    }

    fn page(ids: &[&str]) -> Vec<PlatformMessage> {
        ids.iter().map(|id| message(id)).collect()
    }

    #[test]
    fn extremes_use_snowflake_order_not_string_order() {
        let messages = page(&["100", "99", "101"]);
        let (oldest, newest) = page_extremes(&messages).unwrap();
        assert_eq!(oldest, "99");
        assert_eq!(newest, "101");
        assert!(page_extremes(&[]).is_none());
    }

    #[test]
    fn stop_mode_drops_known_messages_and_stops() {
        let existing: HashSet<String> = ["2".to_string()].into();
        let (fresh, stopped) =
            apply_rescan_policy(page(&["3", "2", "1"]), &existing, RescanMode::Stop);
        assert_eq!(fresh.len(), 2);
        assert!(stopped);
        // The unknown messages in the page are still processed.
        assert!(fresh.iter().any(|m| m.id == "3"));
        assert!(fresh.iter().any(|m| m.id == "1"));
    }

    #[test]
    fn continue_mode_drops_known_messages_but_keeps_walking() {
        let existing: HashSet<String> = ["2".to_string()].into();
        let (fresh, stopped) =
            apply_rescan_policy(page(&["3", "2", "1"]), &existing, RescanMode::Continue);
        assert_eq!(fresh.len(), 2);
        assert!(!stopped);
    }

    #[test]
    fn update_mode_reprocesses_everything() {
        let existing: HashSet<String> = ["2".to_string(), "3".to_string()].into();
        let (fresh, stopped) =
            apply_rescan_policy(page(&["3", "2", "1"]), &existing, RescanMode::Update);
        assert_eq!(fresh.len(), 3);
        assert!(!stopped);
    }

    #[test]
    fn no_known_messages_means_no_stop_in_any_mode() {
        for mode in [RescanMode::Stop, RescanMode::Continue, RescanMode::Update] {
            let (fresh, stopped) = apply_rescan_policy(page(&["2", "1"]), &HashSet::new(), mode);
            assert_eq!(fresh.len(), 2);
            assert!(!stopped);
        }
    }

    #[test]
    fn continuation_only_for_full_clean_pages() {
        assert!(continuation_needed(100, 100, false));
        assert!(!continuation_needed(99, 100, false));
        assert!(!continuation_needed(100, 100, true));
        assert!(!continuation_needed(0, 100, false));
    }

    fn batch_job(direction: ScanDirection) -> BatchScanJob {
        BatchScanJob {
            guild_id: "G1".into(),
            channel_id: "C1".into(),
            direction,
            limit: 100,
            before_message_id: Some("500".into()),
            after_message_id: None,
            auto_continue: true,
            rescan: RescanMode::Stop,
            job_id: Some("j".into()),
            created_at: None,
        }
    }

    #[test]
    fn backward_continuation_cursors_on_the_oldest_id() {
        let next = continuation_for(&batch_job(ScanDirection::Backward), "10", "90");
        assert_eq!(next.before_message_id.as_deref(), Some("10"));
        assert_eq!(next.after_message_id, None);
        assert_eq!(next.rescan, RescanMode::Stop);
        assert!(next.auto_continue);
        assert_eq!(next.job_id, None);
    }

    #[test]
    fn forward_continuation_cursors_on_the_newest_id() {
        let mut job = batch_job(ScanDirection::Forward);
        job.before_message_id = None;
        job.after_message_id = Some("5".into());
        let next = continuation_for(&job, "10", "90");
        assert_eq!(next.after_message_id.as_deref(), Some("90"));
        assert_eq!(next.before_message_id, None);
    }
}
