use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Guild row. Guilds are only ever soft-deleted: the bot may be re-invited
/// and the row is undeleted on re-observation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
    pub owner_user_id: Option<String>,
    pub message_scan_enabled: bool,
    pub last_message_scan_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Guild fields as observed from the platform; input to the upsert path.
/// `icon_url` is always a plain URL string, never a structured object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
    pub owner_user_id: Option<String>,
}
