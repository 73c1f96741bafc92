use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "channel_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Forum,
}

impl Default for ChannelKind {
    fn default() -> Self {
        Self::Text
    }
}

impl ChannelKind {
    /// Categories hold no messages and are never scanned.
    pub fn is_scannable(&self) -> bool {
        !matches!(self, Self::Category)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i32,
    pub parent_id: Option<String>,
    pub nsfw: bool,
    pub message_scan_enabled: bool,
    pub purge_cooldown: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Channel fields as observed from the platform; input to the upsert path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i32,
    pub parent_id: Option<String>,
    pub nsfw: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_not_scannable() {
        assert!(ChannelKind::Text.is_scannable());
        assert!(ChannelKind::Voice.is_scannable());
        assert!(ChannelKind::Forum.is_scannable());
        assert!(!ChannelKind::Category.is_scannable());
    }
}
