// Guild database repository
use chrono::Utc;
use sqlx::PgPool;

use crate::models::{Guild, GuildSnapshot};

pub struct GuildRepository;

impl GuildRepository {
    /// Find guild by ID
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Guild>, sqlx::Error> {
        sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Upsert guild snapshots in a single statement. Re-observed guilds are
    /// undeleted and their name/icon refreshed.
    pub async fn upsert_guilds(
        pool: &PgPool,
        snapshots: &[GuildSnapshot],
    ) -> Result<u64, sqlx::Error> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = snapshots.iter().map(|g| g.id.clone()).collect();
        let names: Vec<String> = snapshots.iter().map(|g| g.name.clone()).collect();
        let icons: Vec<Option<String>> = snapshots.iter().map(|g| g.icon_url.clone()).collect();
        let owners: Vec<Option<String>> =
            snapshots.iter().map(|g| g.owner_user_id.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO guilds (id, name, icon_url, owner_user_id)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                icon_url = EXCLUDED.icon_url,
                owner_user_id = EXCLUDED.owner_user_id,
                deleted_at = NULL,
                updated_at = now()
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&icons)
        .bind(&owners)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft-delete a guild. Scan statuses for the guild are hard-deleted in
    /// the same transaction since their bookkeeping is now meaningless.
    pub async fn soft_delete(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE guilds SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM channel_scan_status WHERE guild_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_scanned(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE guilds SET last_message_scan_at = $1, updated_at = now() WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
