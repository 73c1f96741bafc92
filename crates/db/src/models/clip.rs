use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "thumbnail_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for ThumbnailState {
    fn default() -> Self {
        Self::Pending
    }
}

/// A video attachment projected as an addressable artifact.
///
/// `id` is the content fingerprint: md5 over
/// `message_id:channel_id:filename:timestamp_iso`. The same attachment always
/// maps to the same row, which makes re-delivery and bulk upserts idempotent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub message_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub duration: Option<f64>,
    pub resolution: Option<String>,
    pub cdn_url: String,
    pub expires_at: DateTime<Utc>,
    pub thumbnail_status: ThumbnailState,
    pub settings_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input to the clip bulk upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipRecord {
    pub id: String,
    pub message_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub cdn_url: String,
    pub expires_at: DateTime<Utc>,
    pub thumbnail_status: ThumbnailState,
    pub settings_hash: String,
}
