// Thumbnail database repository
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Thumbnail, ThumbnailSizeType};

pub struct ThumbnailRepository;

impl ThumbnailRepository {
    /// Create or replace the thumbnail row for `(clip_id, size_type)`.
    pub async fn upsert(
        pool: &PgPool,
        clip_id: &str,
        size_type: ThumbnailSizeType,
        storage_path: &str,
        width: i32,
        height: i32,
        file_size: i64,
        mime_type: &str,
    ) -> Result<Thumbnail, sqlx::Error> {
        sqlx::query_as::<_, Thumbnail>(
            r#"
            INSERT INTO thumbnails (id, clip_id, size_type, storage_path, width, height, file_size, mime_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (clip_id, size_type) DO UPDATE SET
                storage_path = EXCLUDED.storage_path,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                file_size = EXCLUDED.file_size,
                mime_type = EXCLUDED.mime_type
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(clip_id)
        .bind(size_type)
        .bind(storage_path)
        .bind(width)
        .bind(height)
        .bind(file_size)
        .bind(mime_type)
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_clip(
        pool: &PgPool,
        clip_id: &str,
    ) -> Result<Vec<Thumbnail>, sqlx::Error> {
        sqlx::query_as::<_, Thumbnail>("SELECT * FROM thumbnails WHERE clip_id = $1")
            .bind(clip_id)
            .fetch_all(pool)
            .await
    }

    pub async fn delete_for_clip(pool: &PgPool, clip_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM thumbnails WHERE clip_id = $1")
            .bind(clip_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
