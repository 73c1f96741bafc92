// Channel database repository
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Channel, ChannelKind, ChannelSnapshot};

pub struct ChannelRepository;

impl ChannelRepository {
    /// Find channel by ID
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Channel>, sqlx::Error> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Upsert channel snapshots for one guild in a single statement.
    /// Re-observed channels are undeleted.
    pub async fn upsert_channels_for_guild(
        pool: &PgPool,
        guild_id: &str,
        snapshots: &[ChannelSnapshot],
    ) -> Result<u64, sqlx::Error> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = snapshots.iter().map(|c| c.id.clone()).collect();
        let names: Vec<String> = snapshots.iter().map(|c| c.name.clone()).collect();
        let kinds: Vec<ChannelKind> = snapshots.iter().map(|c| c.kind).collect();
        let positions: Vec<i32> = snapshots.iter().map(|c| c.position).collect();
        let parents: Vec<Option<String>> = snapshots.iter().map(|c| c.parent_id.clone()).collect();
        let nsfw: Vec<bool> = snapshots.iter().map(|c| c.nsfw).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO channels (id, guild_id, name, kind, position, parent_id, nsfw)
            SELECT t.id, $1, t.name, t.kind, t.position, t.parent_id, t.nsfw
            FROM UNNEST($2::text[], $3::text[], $4::channel_kind[], $5::int[], $6::text[], $7::bool[])
                AS t(id, name, kind, position, parent_id, nsfw)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                position = EXCLUDED.position,
                parent_id = EXCLUDED.parent_id,
                nsfw = EXCLUDED.nsfw,
                deleted_at = NULL,
                updated_at = now()
            "#,
        )
        .bind(guild_id)
        .bind(&ids)
        .bind(&names)
        .bind(&kinds)
        .bind(&positions)
        .bind(&parents)
        .bind(&nsfw)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn soft_delete(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE channels SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Hard delete all channels for a guild (guild purge path).
    pub async fn delete_for_guild(pool: &PgPool, guild_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM channels WHERE guild_id = $1")
            .bind(guild_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Set (or clear, with `None`) the purge cooldown on a channel.
    pub async fn set_purge_cooldown(
        pool: &PgPool,
        id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE channels SET purge_cooldown = $1, updated_at = now() WHERE id = $2")
            .bind(until)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
