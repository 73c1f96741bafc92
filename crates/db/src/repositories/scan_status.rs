// Channel scan status repository
//
// Counter updates are atomic increments so concurrent workers never lose
// counts to read-modify-write races.
use sqlx::PgPool;

use crate::models::{ChannelScanStatus, ScanState};

pub struct ScanStatusRepository;

impl ScanStatusRepository {
    pub async fn get(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<Option<ChannelScanStatus>, sqlx::Error> {
        sqlx::query_as::<_, ChannelScanStatus>(
            "SELECT * FROM channel_scan_status WHERE guild_id = $1 AND channel_id = $2",
        )
        .bind(guild_id)
        .bind(channel_id)
        .fetch_optional(pool)
        .await
    }

    /// Fetch the scan status row, creating a fresh `queued` one on first
    /// touch.
    pub async fn get_or_create(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<ChannelScanStatus, sqlx::Error> {
        sqlx::query_as::<_, ChannelScanStatus>(
            r#"
            INSERT INTO channel_scan_status (guild_id, channel_id)
            VALUES ($1, $2)
            ON CONFLICT (guild_id, channel_id) DO UPDATE SET guild_id = EXCLUDED.guild_id
            RETURNING *
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .fetch_one(pool)
        .await
    }

    /// Transition the FSM. The error message is always overwritten: passing
    /// `None` clears a stale error from a previous run.
    pub async fn set_status(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
        status: ScanState,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET status = $1, error_message = $2, updated_at = now()
            WHERE guild_id = $3 AND channel_id = $4
            "#,
        )
        .bind(status)
        .bind(error_message)
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Advance history cursors. Only non-`None` boundaries are written, so a
    /// backward continuation cannot clobber the forward cursor.
    pub async fn set_cursors(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
        forward_message_id: Option<&str>,
        backward_message_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET forward_message_id = COALESCE($1, forward_message_id),
                backward_message_id = COALESCE($2, backward_message_id),
                updated_at = now()
            WHERE guild_id = $3 AND channel_id = $4
            "#,
        )
        .bind(forward_message_id)
        .bind(backward_message_id)
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn increment_counts(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
        messages_scanned: i64,
        clips_found: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET total_messages_scanned = total_messages_scanned + $1,
                message_count = message_count + $2,
                updated_at = now()
            WHERE guild_id = $3 AND channel_id = $4
            "#,
        )
        .bind(messages_scanned)
        .bind(clips_found)
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return the channel to its initial state: `queued`, no cursors, zeroed
    /// counters.
    pub async fn reset(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET status = 'queued',
                forward_message_id = NULL,
                backward_message_id = NULL,
                message_count = 0,
                total_messages_scanned = 0,
                error_message = NULL,
                updated_at = now()
            WHERE guild_id = $1 AND channel_id = $2
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Raise `forward_message_id` to `candidate` only if it is newer than the
    /// stored cursor. Snowflakes order numerically.
    pub async fn advance_forward_if_newer(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
        candidate: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE channel_scan_status
            SET forward_message_id = $1, updated_at = now()
            WHERE guild_id = $2 AND channel_id = $3
              AND (forward_message_id IS NULL
                   OR forward_message_id::numeric < $1::numeric)
            "#,
        )
        .bind(candidate)
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(
        pool: &PgPool,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM channel_scan_status WHERE guild_id = $1 AND channel_id = $2",
        )
        .bind(guild_id)
        .bind(channel_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
