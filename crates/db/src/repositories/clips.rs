// Clip database repository
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Clip, ClipRecord, ThumbnailState};

pub struct ClipRepository;

impl ClipRepository {
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Clip>, sqlx::Error> {
        sqlx::query_as::<_, Clip>("SELECT * FROM clips WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Load a set of clips by fingerprint in one query; used by the batch
    /// processor to avoid N+1 fetches.
    pub async fn load_by_ids(pool: &PgPool, ids: &[String]) -> Result<Vec<Clip>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, Clip>("SELECT * FROM clips WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// Bulk upsert clips in a single statement. The fingerprint primary key
    /// makes redelivered pages idempotent.
    pub async fn bulk_upsert(pool: &PgPool, records: &[ClipRecord]) -> Result<u64, sqlx::Error> {
        if records.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = records.iter().map(|c| c.id.clone()).collect();
        let message_ids: Vec<String> = records.iter().map(|c| c.message_id.clone()).collect();
        let guild_ids: Vec<String> = records.iter().map(|c| c.guild_id.clone()).collect();
        let channel_ids: Vec<String> = records.iter().map(|c| c.channel_id.clone()).collect();
        let author_ids: Vec<String> = records.iter().map(|c| c.author_id.clone()).collect();
        let filenames: Vec<String> = records.iter().map(|c| c.filename.clone()).collect();
        let file_sizes: Vec<i64> = records.iter().map(|c| c.file_size).collect();
        let mime_types: Vec<String> = records.iter().map(|c| c.mime_type.clone()).collect();
        let cdn_urls: Vec<String> = records.iter().map(|c| c.cdn_url.clone()).collect();
        let expires: Vec<DateTime<Utc>> = records.iter().map(|c| c.expires_at).collect();
        let statuses: Vec<ThumbnailState> =
            records.iter().map(|c| c.thumbnail_status).collect();
        let hashes: Vec<String> = records.iter().map(|c| c.settings_hash.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO clips (
                id, message_id, guild_id, channel_id, author_id, filename,
                file_size, mime_type, cdn_url, expires_at, thumbnail_status, settings_hash
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[],
                $7::bigint[], $8::text[], $9::text[], $10::timestamptz[],
                $11::thumbnail_state[], $12::text[]
            )
            ON CONFLICT (id) DO UPDATE SET
                message_id = EXCLUDED.message_id,
                guild_id = EXCLUDED.guild_id,
                channel_id = EXCLUDED.channel_id,
                author_id = EXCLUDED.author_id,
                filename = EXCLUDED.filename,
                file_size = EXCLUDED.file_size,
                mime_type = EXCLUDED.mime_type,
                cdn_url = EXCLUDED.cdn_url,
                expires_at = EXCLUDED.expires_at,
                thumbnail_status = EXCLUDED.thumbnail_status,
                settings_hash = EXCLUDED.settings_hash,
                updated_at = now()
            "#,
        )
        .bind(&ids)
        .bind(&message_ids)
        .bind(&guild_ids)
        .bind(&channel_ids)
        .bind(&author_ids)
        .bind(&filenames)
        .bind(&file_sizes)
        .bind(&mime_types)
        .bind(&cdn_urls)
        .bind(&expires)
        .bind(&statuses)
        .bind(&hashes)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn set_thumbnail_status(
        pool: &PgPool,
        id: &str,
        status: ThumbnailState,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE clips SET thumbnail_status = $1, updated_at = now() WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark a clip completed, filling probe metadata. Existing non-null
    /// duration/resolution values win over freshly probed ones; the mime type
    /// is always refreshed when the probe yields one.
    pub async fn complete_with_metadata(
        pool: &PgPool,
        id: &str,
        mime_type: Option<&str>,
        duration: Option<f64>,
        resolution: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE clips
            SET thumbnail_status = 'completed',
                mime_type = COALESCE($1, mime_type),
                duration = COALESCE(duration, $2),
                resolution = COALESCE(resolution, $3),
                updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(mime_type)
        .bind(duration)
        .bind(resolution)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Refresh only the CDN URL and its expiry, leaving thumbnail state
    /// untouched. Used when a completed clip reappears with a fresh URL.
    pub async fn refresh_cdn_url(
        pool: &PgPool,
        id: &str,
        cdn_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE clips SET cdn_url = $1, expires_at = $2, updated_at = now() WHERE id = $3",
        )
        .bind(cdn_url)
        .bind(expires_at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_message(
        pool: &PgPool,
        message_id: &str,
    ) -> Result<Vec<Clip>, sqlx::Error> {
        sqlx::query_as::<_, Clip>("SELECT * FROM clips WHERE message_id = $1")
            .bind(message_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_channel(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Vec<Clip>, sqlx::Error> {
        sqlx::query_as::<_, Clip>(
            "SELECT * FROM clips WHERE guild_id = $1 AND channel_id = $2",
        )
        .bind(guild_id)
        .bind(channel_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_guild(pool: &PgPool, guild_id: &str) -> Result<Vec<Clip>, sqlx::Error> {
        sqlx::query_as::<_, Clip>("SELECT * FROM clips WHERE guild_id = $1")
            .bind(guild_id)
            .fetch_all(pool)
            .await
    }

    /// Clips stuck in `pending`/`processing` longer than the cutoff; fed to
    /// the failed-thumbnail backoff machinery by the stale cleanup.
    pub async fn find_stale_processing(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Clip>, sqlx::Error> {
        sqlx::query_as::<_, Clip>(
            r#"
            SELECT * FROM clips
            WHERE thumbnail_status IN ('pending', 'processing') AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    pub async fn delete_by_id(pool: &PgPool, id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM clips WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_message(pool: &PgPool, message_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM clips WHERE message_id = $1")
            .bind(message_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_channel(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM clips WHERE guild_id = $1 AND channel_id = $2")
            .bind(guild_id)
            .bind(channel_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_guild(pool: &PgPool, guild_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM clips WHERE guild_id = $1")
            .bind(guild_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
