use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};

/// Guild-level settings storage. `default_channel_settings` seeds every
/// channel in the guild; `settings` are guild-wide overrides applied on top.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GuildSettingsRow {
    pub guild_id: String,
    pub settings: Json<Value>,
    pub default_channel_settings: Json<Value>,
    pub updated_at: DateTime<Utc>,
}

/// Channel-specific overrides, the last layer of the merge.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelSettingsRow {
    pub channel_id: String,
    pub settings: Json<Value>,
    pub updated_at: DateTime<Utc>,
}
