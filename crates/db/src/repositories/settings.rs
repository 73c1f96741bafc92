// Settings storage repository
use sqlx::PgPool;

use crate::models::{ChannelSettingsRow, GuildSettingsRow};

pub struct SettingsRepository;

impl SettingsRepository {
    pub async fn guild_settings(
        pool: &PgPool,
        guild_id: &str,
    ) -> Result<Option<GuildSettingsRow>, sqlx::Error> {
        sqlx::query_as::<_, GuildSettingsRow>(
            "SELECT * FROM guild_settings WHERE guild_id = $1",
        )
        .bind(guild_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn channel_settings(
        pool: &PgPool,
        channel_id: &str,
    ) -> Result<Option<ChannelSettingsRow>, sqlx::Error> {
        sqlx::query_as::<_, ChannelSettingsRow>(
            "SELECT * FROM channel_settings WHERE channel_id = $1",
        )
        .bind(channel_id)
        .fetch_optional(pool)
        .await
    }
}
