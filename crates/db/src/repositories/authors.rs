// Author database repository
use std::collections::HashSet;

use sqlx::PgPool;

use crate::models::AuthorRecord;

pub struct AuthorRepository;

impl AuthorRepository {
    /// Bulk upsert authors. One statement regardless of batch size; this is
    /// a hot path during scans.
    pub async fn bulk_upsert(
        pool: &PgPool,
        records: &[AuthorRecord],
    ) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let user_ids: Vec<String> = records.iter().map(|a| a.user_id.clone()).collect();
        let guild_ids: Vec<String> = records.iter().map(|a| a.guild_id.clone()).collect();
        let usernames: Vec<String> = records.iter().map(|a| a.username.clone()).collect();
        let discriminators: Vec<Option<String>> =
            records.iter().map(|a| a.discriminator.clone()).collect();
        let avatar_urls: Vec<Option<String>> =
            records.iter().map(|a| a.avatar_url.clone()).collect();
        let nicknames: Vec<Option<String>> = records.iter().map(|a| a.nickname.clone()).collect();
        let display_names: Vec<String> = records.iter().map(|a| a.display_name.clone()).collect();
        let guild_avatar_urls: Vec<Option<String>> =
            records.iter().map(|a| a.guild_avatar_url.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO authors (
                user_id, guild_id, username, discriminator, avatar_url,
                nickname, display_name, guild_avatar_url
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[],
                $5::text[], $6::text[], $7::text[], $8::text[]
            )
            ON CONFLICT (user_id, guild_id) DO UPDATE SET
                username = EXCLUDED.username,
                discriminator = EXCLUDED.discriminator,
                avatar_url = EXCLUDED.avatar_url,
                nickname = EXCLUDED.nickname,
                display_name = EXCLUDED.display_name,
                guild_avatar_url = EXCLUDED.guild_avatar_url,
                updated_at = now()
            "#,
        )
        .bind(&user_ids)
        .bind(&guild_ids)
        .bind(&usernames)
        .bind(&discriminators)
        .bind(&avatar_urls)
        .bind(&nicknames)
        .bind(&display_names)
        .bind(&guild_avatar_urls)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// All author user-ids known for a guild. Update-mode rescans preload
    /// this set so stale rows get rewritten.
    pub async fn ids_for_guild(
        pool: &PgPool,
        guild_id: &str,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM authors WHERE guild_id = $1")
                .bind(guild_id)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
