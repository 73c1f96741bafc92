use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "thumbnail_size", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSizeType {
    Small,
    Large,
}

/// Generated raster artifact. Unique per `(clip_id, size_type)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Thumbnail {
    pub id: Uuid,
    pub clip_id: String,
    pub size_type: ThumbnailSizeType,
    pub storage_path: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Per-clip retry bookkeeping for thumbnail generation. One row per clip;
/// deleted on the first success.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FailedThumbnail {
    pub id: Uuid,
    pub clip_id: String,
    pub error_message: String,
    pub retry_count: i32,
    pub last_attempted_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
