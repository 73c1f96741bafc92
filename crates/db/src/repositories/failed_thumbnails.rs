// Failed thumbnail repository
//
// One row per clip tracks the retry schedule. The backoff ladder itself
// lives with the thumbnail handler; this layer only persists the outcome.
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::FailedThumbnail;

pub struct FailedThumbnailRepository;

impl FailedThumbnailRepository {
    pub async fn find_for_clip(
        pool: &PgPool,
        clip_id: &str,
    ) -> Result<Option<FailedThumbnail>, sqlx::Error> {
        sqlx::query_as::<_, FailedThumbnail>(
            "SELECT * FROM failed_thumbnails WHERE clip_id = $1",
        )
        .bind(clip_id)
        .fetch_optional(pool)
        .await
    }

    /// Record a failure, creating the row at `retry_count = 1` or bumping an
    /// existing one. Returns the row so the caller can log the new schedule.
    pub async fn record_failure(
        pool: &PgPool,
        clip_id: &str,
        error_message: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<FailedThumbnail, sqlx::Error> {
        sqlx::query_as::<_, FailedThumbnail>(
            r#"
            INSERT INTO failed_thumbnails (
                id, clip_id, error_message, retry_count, last_attempted_at, next_retry_at
            )
            VALUES ($1, $2, $3, 1, now(), $4)
            ON CONFLICT (clip_id) DO UPDATE SET
                error_message = EXCLUDED.error_message,
                retry_count = failed_thumbnails.retry_count + 1,
                last_attempted_at = now(),
                next_retry_at = EXCLUDED.next_retry_at,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(clip_id)
        .bind(error_message)
        .bind(next_retry_at)
        .fetch_one(pool)
        .await
    }

    /// Rows due for retry, oldest schedule first. When `clip_ids` is given
    /// the retry is targeted and the due-time filter still applies.
    pub async fn due(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
        clip_ids: Option<&[String]>,
    ) -> Result<Vec<FailedThumbnail>, sqlx::Error> {
        match clip_ids {
            Some(ids) => {
                sqlx::query_as::<_, FailedThumbnail>(
                    r#"
                    SELECT * FROM failed_thumbnails
                    WHERE next_retry_at <= $1 AND clip_id = ANY($2)
                    ORDER BY next_retry_at
                    LIMIT $3
                    "#,
                )
                .bind(now)
                .bind(ids)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, FailedThumbnail>(
                    r#"
                    SELECT * FROM failed_thumbnails
                    WHERE next_retry_at <= $1
                    ORDER BY next_retry_at
                    LIMIT $2
                    "#,
                )
                .bind(now)
                .bind(limit)
                .fetch_all(pool)
                .await
            }
        }
    }

    pub async fn delete_for_clip(pool: &PgPool, clip_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM failed_thumbnails WHERE clip_id = $1")
            .bind(clip_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
