// Message database repository
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Message, MessageRecord};

pub struct MessageRepository;

impl MessageRepository {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Bulk upsert messages in a single statement.
    pub async fn bulk_upsert(
        pool: &PgPool,
        records: &[MessageRecord],
    ) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = records.iter().map(|m| m.id.clone()).collect();
        let guild_ids: Vec<String> = records.iter().map(|m| m.guild_id.clone()).collect();
        let channel_ids: Vec<String> = records.iter().map(|m| m.channel_id.clone()).collect();
        let author_ids: Vec<String> = records.iter().map(|m| m.author_id.clone()).collect();
        let contents: Vec<String> = records.iter().map(|m| m.content.clone()).collect();
        let timestamps: Vec<DateTime<Utc>> = records.iter().map(|m| m.timestamp).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO messages (id, guild_id, channel_id, author_id, content, timestamp)
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::timestamptz[]
            )
            ON CONFLICT (id) DO UPDATE SET
                guild_id = EXCLUDED.guild_id,
                channel_id = EXCLUDED.channel_id,
                author_id = EXCLUDED.author_id,
                content = EXCLUDED.content,
                timestamp = EXCLUDED.timestamp,
                updated_at = now()
            "#,
        )
        .bind(&ids)
        .bind(&guild_ids)
        .bind(&channel_ids)
        .bind(&author_ids)
        .bind(&contents)
        .bind(&timestamps)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Which of `ids` already exist in the channel. Single id-set query used
    /// to partition a history page into known and new messages.
    pub async fn existing_ids(
        pool: &PgPool,
        channel_id: &str,
        ids: &[String],
    ) -> Result<HashSet<String>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM messages WHERE channel_id = $1 AND id = ANY($2)",
        )
        .bind(channel_id)
        .bind(ids)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Hard delete. Platform deletions are permanent because the CDN URLs
    /// are unrecoverable; `deleted_at` is reserved for operator archival.
    pub async fn delete_by_id(pool: &PgPool, id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_channel(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM messages WHERE guild_id = $1 AND channel_id = $2")
                .bind(guild_id)
                .bind(channel_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_guild(pool: &PgPool, guild_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM messages WHERE guild_id = $1")
            .bind(guild_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
