use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Guild-scoped member projection. One row per `(user_id, guild_id)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Author {
    pub user_id: String,
    pub guild_id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar_url: Option<String>,
    pub nickname: Option<String>,
    pub display_name: String,
    pub guild_avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to the author bulk upsert. Built either from a full guild-member
/// projection or, when the member is uncached, from the message's user view
/// (nickname and guild avatar absent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorRecord {
    pub user_id: String,
    pub guild_id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar_url: Option<String>,
    pub nickname: Option<String>,
    pub display_name: String,
    pub guild_avatar_url: Option<String>,
}
