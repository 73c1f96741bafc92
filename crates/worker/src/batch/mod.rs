//! Batch message processor.
//!
//! Handles a page of messages for one `(guild, channel)` with a fixed number
//! of database round trips: settings once, one bulk clip load, three bulk
//! upserts, one bulk reload before thumbnail fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use db::repositories::{AuthorRepository, ClipRepository, MessageRepository};
use db::retry::{with_retry, RetryConfig};
use db::DBService;
use services::settings::SettingsResolver;

use crate::error::WorkerError;
use crate::platform::{PlatformClient, PlatformMessage};
use crate::thumbnail::ThumbnailHandler;

pub mod clip_metadata;
mod context;
pub mod validators;

use clip_metadata::{all_clip_ids, build_clip_id_map};
pub use context::{BatchContext, ExistingClip};

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub clips_found: u64,
    pub thumbnails_generated: u64,
}

pub struct BatchProcessor {
    db: DBService,
    settings: Arc<SettingsResolver>,
    platform: Arc<dyn PlatformClient>,
    thumbnails: Arc<ThumbnailHandler>,
    retry: RetryConfig,
}

impl BatchProcessor {
    pub fn new(
        db: DBService,
        settings: Arc<SettingsResolver>,
        platform: Arc<dyn PlatformClient>,
        thumbnails: Arc<ThumbnailHandler>,
    ) -> Self {
        Self {
            db,
            settings,
            platform,
            thumbnails,
            retry: RetryConfig::from_env(),
        }
    }

    pub async fn process_batch(
        &self,
        messages: &[PlatformMessage],
        guild_id: &str,
        channel_id: &str,
        existing_author_ids: HashSet<String>,
        is_update_scan: bool,
    ) -> Result<BatchOutcome, WorkerError> {
        if messages.is_empty() {
            return Ok(BatchOutcome::default());
        }

        info!("Starting batch processing of {} messages", messages.len());

        let settings = self.settings.resolve(guild_id, channel_id).await?;
        let mut context = BatchContext::new(
            guild_id,
            channel_id,
            settings,
            existing_author_ids,
            is_update_scan,
        );

        let clip_map = build_clip_id_map(messages, channel_id, &context.settings);
        let clip_ids = all_clip_ids(&clip_map);

        for clip in ClipRepository::load_by_ids(&self.db.pool, &clip_ids).await? {
            if clip.channel_id == channel_id {
                context.existing_clips.insert(
                    clip.id.clone(),
                    ExistingClip {
                        thumbnail_status: clip.thumbnail_status,
                        settings_hash: clip.settings_hash,
                        expires_at: clip.expires_at,
                    },
                );
            }
        }
        debug!(
            "Found {} existing clips from {} potential clips",
            context.existing_clips.len(),
            clip_ids.len()
        );

        self.collect_authors(messages, &clip_map, &mut context).await;

        for message in messages {
            let Some(clips) = clip_map.get(&message.id) else {
                continue;
            };
            context.add_message(message);
            for clip in clips {
                context.add_clip(clip, &message.author.id);
            }
        }

        // The bulk upserts retry on transient failures only; constraint
        // violations surface immediately.
        let authors = context.authors();
        with_retry("bulk_upsert_authors", &self.retry, || {
            AuthorRepository::bulk_upsert(&self.db.pool, &authors)
        })
        .await?;
        let message_rows = context.messages();
        with_retry("bulk_upsert_messages", &self.retry, || {
            MessageRepository::bulk_upsert(&self.db.pool, &message_rows)
        })
        .await?;
        let clip_rows = context.clips();
        with_retry("bulk_upsert_clips", &self.retry, || {
            ClipRepository::bulk_upsert(&self.db.pool, &clip_rows)
        })
        .await?;

        let thumbnails_generated = self.generate_thumbnails(&context).await?;

        info!(
            "Batch processing complete: {} clips found, {} thumbnails skipped, {} generated",
            context.clips_found, context.thumbnails_skipped, thumbnails_generated
        );

        Ok(BatchOutcome {
            clips_found: context.clips_found,
            thumbnails_generated,
        })
    }

    /// Resolve author rows for every message that contributed clips. The
    /// guild-member projection is preferred; uncached members fall back to
    /// the message's user view.
    async fn collect_authors(
        &self,
        messages: &[PlatformMessage],
        clip_map: &HashMap<String, Vec<clip_metadata::ClipInfo>>,
        context: &mut BatchContext,
    ) {
        let mut author_ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for message in messages {
            if clip_map.contains_key(&message.id) && seen.insert(message.author.id.clone()) {
                author_ids.push(message.author.id.clone());
            }
        }
        if author_ids.is_empty() {
            return;
        }

        let mut fell_back = 0usize;
        for author_id in &author_ids {
            match self.platform.fetch_member(&context.guild_id, author_id).await {
                Ok(member) => context.add_member_author(&member),
                Err(err) => {
                    fell_back += 1;
                    if fell_back <= 5 {
                        debug!(
                            "Member {} unavailable ({}), using message author fallback",
                            author_id, err
                        );
                    }
                    if let Some(message) = messages
                        .iter()
                        .find(|m| &m.author.id == author_id && clip_map.contains_key(&m.id))
                    {
                        context.add_user_author(&message.author);
                    }
                }
            }
        }

        if fell_back > 0 {
            info!(
                "Author processing: {} resolved as members, {} fell back to message data",
                author_ids.len() - fell_back,
                fell_back
            );
        }
    }

    /// Reload the pending clips in one query and hand each to the thumbnail
    /// handler sequentially.
    async fn generate_thumbnails(&self, context: &BatchContext) -> Result<u64, WorkerError> {
        let needing = context.clips_needing_thumbnails();
        if needing.is_empty() {
            return Ok(0);
        }

        info!("Generating thumbnails for {} clips", needing.len());

        let clips = ClipRepository::load_by_ids(&self.db.pool, needing).await?;
        let by_id: HashMap<&str, &db::models::Clip> =
            clips.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut generated = 0;
        for clip_id in needing {
            let Some(clip) = by_id.get(clip_id.as_str()) else {
                warn!("Clip {} disappeared before thumbnail generation", clip_id);
                continue;
            };
            if self.thumbnails.process_clip(clip).await {
                generated += 1;
            }
        }
        Ok(generated)
    }
}
