// Recovery for scans stuck in a live state.
//
// Worker crashes, dropped queue entries, and network partitions all leave
// scans marked running/queued with nobody advancing them. The stale sweep
// cancels them so operators can re-enqueue.
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::models::ChannelScanStatus;

pub struct ScanRecoveryRepository;

impl ScanRecoveryRepository {
    /// Scans still marked running/queued whose last update is older than
    /// `cutoff`.
    pub async fn find_stale(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChannelScanStatus>, sqlx::Error> {
        sqlx::query_as::<_, ChannelScanStatus>(
            r#"
            SELECT * FROM channel_scan_status
            WHERE status IN ('running', 'queued') AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    /// Cancel every stale scan in one statement; returns the number
    /// recovered.
    pub async fn cancel_stale(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET status = 'cancelled', error_message = $1, updated_at = now()
            WHERE status IN ('running', 'queued') AND updated_at < $2
            "#,
        )
        .bind(reason)
        .bind(cutoff)
        .execute(pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!("Recovered {} stale scan(s)", recovered);
        }
        Ok(recovered)
    }

    /// Cancel a live scan for a single channel (purge path). Terminal scans
    /// are left alone.
    pub async fn cancel_live_for_channel(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET status = 'cancelled', error_message = $1, updated_at = now()
            WHERE guild_id = $2 AND channel_id = $3 AND status IN ('running', 'queued')
            "#,
        )
        .bind(reason)
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Stopped active scan for channel {}", channel_id);
        }
        Ok(result.rows_affected())
    }

    /// Cancel all live scans for a guild (guild purge path).
    pub async fn cancel_live_for_guild(
        pool: &PgPool,
        guild_id: &str,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET status = 'cancelled', error_message = $1, updated_at = now()
            WHERE guild_id = $2 AND status IN ('running', 'queued')
            "#,
        )
        .bind(reason)
        .bind(guild_id)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(
                "Stopped {} active scan(s) for guild {}",
                result.rows_affected(),
                guild_id
            );
        }
        Ok(result.rows_affected())
    }

    pub async fn delete_for_guild(pool: &PgPool, guild_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM channel_scan_status WHERE guild_id = $1")
            .bind(guild_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
