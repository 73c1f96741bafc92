//! Accumulator for one batch: rows to upsert, clips that need thumbnail
//! work, and counters. All decisions about skipping or regenerating
//! thumbnails are made here against the bulk-loaded existing clips.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use db::models::{AuthorRecord, ClipRecord, MessageRecord, ThumbnailState};
use services::settings::ResolvedSettings;

use crate::platform::{PlatformMember, PlatformMessage, PlatformUser};

use super::clip_metadata::ClipInfo;

/// The slice of an existing clip row the skip decision needs.
#[derive(Debug, Clone)]
pub struct ExistingClip {
    pub thumbnail_status: ThumbnailState,
    pub settings_hash: String,
    pub expires_at: DateTime<Utc>,
}

pub struct BatchContext {
    pub guild_id: String,
    pub channel_id: String,
    pub settings: ResolvedSettings,
    pub settings_hash: String,
    pub is_update_scan: bool,
    pub existing_author_ids: HashSet<String>,
    pub existing_clips: HashMap<String, ExistingClip>,

    authors: HashMap<String, AuthorRecord>,
    messages: HashMap<String, MessageRecord>,
    clips: HashMap<String, ClipRecord>,
    clips_needing_thumbnails: Vec<String>,

    pub clips_found: u64,
    pub thumbnails_skipped: u64,
}

impl BatchContext {
    pub fn new(
        guild_id: &str,
        channel_id: &str,
        settings: ResolvedSettings,
        existing_author_ids: HashSet<String>,
        is_update_scan: bool,
    ) -> Self {
        let settings_hash = settings.settings_hash();
        Self {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            settings,
            settings_hash,
            is_update_scan,
            existing_author_ids,
            existing_clips: HashMap::new(),
            authors: HashMap::new(),
            messages: HashMap::new(),
            clips: HashMap::new(),
            clips_needing_thumbnails: Vec::new(),
            clips_found: 0,
            thumbnails_skipped: 0,
        }
    }

    fn should_write_author(&self, user_id: &str) -> bool {
        // Update scans rewrite every author so stale rows get refreshed;
        // normal scans only write authors we have not seen.
        self.is_update_scan || !self.existing_author_ids.contains(user_id)
    }

    /// Full guild-member projection, the preferred author source.
    pub fn add_member_author(&mut self, member: &PlatformMember) {
        let user_id = member.user.id.clone();
        if !self.should_write_author(&user_id) || self.authors.contains_key(&user_id) {
            return;
        }
        self.authors.insert(
            user_id.clone(),
            AuthorRecord {
                user_id,
                guild_id: self.guild_id.clone(),
                username: member.user.username.clone(),
                discriminator: member.user.discriminator.clone(),
                avatar_url: member.user.avatar_url.clone(),
                nickname: member.nickname.clone(),
                display_name: member
                    .nickname
                    .clone()
                    .unwrap_or_else(|| member.user.display_name.clone()),
                guild_avatar_url: member.guild_avatar_url.clone(),
            },
        );
    }

    /// Fallback when the member is uncached: the message's user view, with
    /// no nickname or guild avatar.
    pub fn add_user_author(&mut self, user: &PlatformUser) {
        let user_id = user.id.clone();
        if !self.should_write_author(&user_id) || self.authors.contains_key(&user_id) {
            return;
        }
        self.authors.insert(
            user_id.clone(),
            AuthorRecord {
                user_id,
                guild_id: self.guild_id.clone(),
                username: user.username.clone(),
                discriminator: user.discriminator.clone(),
                avatar_url: user.avatar_url.clone(),
                nickname: None,
                display_name: user.display_name.clone(),
                guild_avatar_url: None,
            },
        );
    }

    pub fn add_message(&mut self, message: &PlatformMessage) {
        if self.messages.contains_key(&message.id) {
            return;
        }
        let content = if self.settings.enable_message_content_storage() {
            message.content.clone()
        } else {
            String::new()
        };
        self.messages.insert(
            message.id.clone(),
            MessageRecord {
                id: message.id.clone(),
                guild_id: self.guild_id.clone(),
                channel_id: self.channel_id.clone(),
                author_id: message.author.id.clone(),
                content,
                timestamp: message.timestamp,
            },
        );
    }

    /// Record a clip and decide whether it needs thumbnail work.
    ///
    /// A completed clip processed under the same settings is skipped
    /// entirely; its row is only rewritten when the CDN URL has expired.
    /// Everything else is upserted as `pending` and queued unless another
    /// worker is already processing it under the same settings.
    pub fn add_clip(&mut self, clip: &ClipInfo, author_id: &str) -> bool {
        let existing = self.existing_clips.get(&clip.clip_id);

        if let Some(existing) = existing {
            if existing.settings_hash == self.settings_hash
                && existing.thumbnail_status == ThumbnailState::Completed
            {
                self.thumbnails_skipped += 1;
                if existing.expires_at < Utc::now() {
                    self.clips.insert(
                        clip.clip_id.clone(),
                        self.record_for(clip, author_id, ThumbnailState::Completed),
                    );
                }
                return false;
            }
        }

        let needs_thumbnail = match existing {
            None => true,
            Some(existing) => {
                matches!(
                    existing.thumbnail_status,
                    ThumbnailState::Failed | ThumbnailState::Pending
                ) || existing.settings_hash != self.settings_hash
            }
        };

        self.clips.insert(
            clip.clip_id.clone(),
            self.record_for(clip, author_id, ThumbnailState::Pending),
        );
        self.clips_found += 1;

        if needs_thumbnail {
            self.clips_needing_thumbnails.push(clip.clip_id.clone());
        } else {
            self.thumbnails_skipped += 1;
        }
        needs_thumbnail
    }

    fn record_for(
        &self,
        clip: &ClipInfo,
        author_id: &str,
        thumbnail_status: ThumbnailState,
    ) -> ClipRecord {
        ClipRecord {
            id: clip.clip_id.clone(),
            message_id: clip.message_id.clone(),
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            author_id: author_id.to_string(),
            filename: clip.filename.clone(),
            file_size: clip.file_size,
            mime_type: clip.mime_type.clone(),
            cdn_url: clip.cdn_url.clone(),
            expires_at: clip.expires_at,
            thumbnail_status,
            settings_hash: self.settings_hash.clone(),
        }
    }

    pub fn authors(&self) -> Vec<AuthorRecord> {
        self.authors.values().cloned().collect()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.messages.values().cloned().collect()
    }

    pub fn clips(&self) -> Vec<ClipRecord> {
        self.clips.values().cloned().collect()
    }

    pub fn clips_needing_thumbnails(&self) -> &[String] {
        &self.clips_needing_thumbnails
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn context() -> BatchContext {
        BatchContext::new(
            "g1",
            "c1",
            ResolvedSettings::from_layers(&[]),
            HashSet::new(),
            false,
        )
    }

    fn clip_info(id: &str) -> ClipInfo {
        ClipInfo {
            clip_id: id.into(),
            message_id: "m1".into(),
            filename: "clip.mp4".into(),
            file_size: 2048,
            mime_type: "video/mp4".into(),
            cdn_url: "https://cdn.example.com/clip.mp4".into(),
            expires_at: Utc::now() + Duration::hours(24),
        }
    }

    #[test]
    fn new_clips_need_thumbnails() {
        let mut ctx = context();
        assert!(ctx.add_clip(&clip_info("a"), "author"));
        assert_eq!(ctx.clips_found, 1);
        assert_eq!(ctx.clips_needing_thumbnails(), &["a".to_string()]);
    }

    #[test]
    fn completed_clips_with_matching_hash_are_skipped() {
        let mut ctx = context();
        let hash = ctx.settings_hash.clone();
        ctx.existing_clips.insert(
            "a".into(),
            ExistingClip {
                thumbnail_status: ThumbnailState::Completed,
                settings_hash: hash,
                expires_at: Utc::now() + Duration::hours(1),
            },
        );

        assert!(!ctx.add_clip(&clip_info("a"), "author"));
        assert_eq!(ctx.clips_found, 0);
        assert_eq!(ctx.thumbnails_skipped, 1);
        // Unexpired URL: no row rewrite either.
        assert!(ctx.clips().is_empty());
    }

    #[test]
    fn expired_completed_clips_get_their_url_refreshed() {
        let mut ctx = context();
        let hash = ctx.settings_hash.clone();
        ctx.existing_clips.insert(
            "a".into(),
            ExistingClip {
                thumbnail_status: ThumbnailState::Completed,
                settings_hash: hash,
                expires_at: Utc::now() - Duration::hours(1),
            },
        );

        assert!(!ctx.add_clip(&clip_info("a"), "author"));
        let clips = ctx.clips();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].thumbnail_status, ThumbnailState::Completed);
    }

    #[test]
    fn settings_change_forces_regeneration() {
        let mut ctx = context();
        ctx.existing_clips.insert(
            "a".into(),
            ExistingClip {
                thumbnail_status: ThumbnailState::Completed,
                settings_hash: "stale-hash".into(),
                expires_at: Utc::now() + Duration::hours(1),
            },
        );

        assert!(ctx.add_clip(&clip_info("a"), "author"));
        assert_eq!(ctx.clips_found, 1);
        assert_eq!(ctx.clips()[0].thumbnail_status, ThumbnailState::Pending);
    }

    #[test]
    fn clips_in_flight_elsewhere_are_not_requeued() {
        let mut ctx = context();
        let hash = ctx.settings_hash.clone();
        ctx.existing_clips.insert(
            "a".into(),
            ExistingClip {
                thumbnail_status: ThumbnailState::Processing,
                settings_hash: hash,
                expires_at: Utc::now() + Duration::hours(1),
            },
        );

        assert!(!ctx.add_clip(&clip_info("a"), "author"));
        // The row is still rewritten, but no duplicate thumbnail work.
        assert_eq!(ctx.clips().len(), 1);
        assert!(ctx.clips_needing_thumbnails().is_empty());
    }

    #[test]
    fn content_storage_setting_blanks_message_content() {
        let settings = ResolvedSettings::from_layers(&[&serde_json::json!({
            "enable_message_content_storage": false
        })]);
        let mut ctx = BatchContext::new("g1", "c1", settings, HashSet::new(), false);

        let message = PlatformMessage {
            id: "m1".into(),
            author: PlatformUser {
                id: "u1".into(),
                username: "user".into(),
                discriminator: None,
                display_name: "user".into(),
                avatar_url: None,
            },
            content: "secret text".into(),
            timestamp: Utc::now(),
            attachments: vec![],
        };
        ctx.add_message(&message);
        assert_eq!(ctx.messages()[0].content, "");
    }

    #[test]
    fn update_scans_rewrite_known_authors() {
        let mut existing = HashSet::new();
        existing.insert("u1".to_string());

        let user = PlatformUser {
            id: "u1".into(),
            username: "user".into(),
            discriminator: None,
            display_name: "user".into(),
            avatar_url: None,
        };

        let mut normal = BatchContext::new(
            "g1",
            "c1",
            ResolvedSettings::from_layers(&[]),
            existing.clone(),
            false,
        );
        normal.add_user_author(&user);
        assert!(normal.authors().is_empty());

        let mut update = BatchContext::new(
            "g1",
            "c1",
            ResolvedSettings::from_layers(&[]),
            existing,
            true,
        );
        update.add_user_author(&user);
        assert_eq!(update.authors().len(), 1);
    }
}
