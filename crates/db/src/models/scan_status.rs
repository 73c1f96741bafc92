use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Channel scan lifecycle.
///
/// `queued` and `running` are live states; `succeeded`, `failed` and
/// `cancelled` are terminal for that scan. A new scan on the same channel
/// re-enters at `queued`/`running`.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "scan_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl Default for ScanState {
    fn default() -> Self {
        Self::Queued
    }
}

impl ScanState {
    /// States a stale-scan sweep is allowed to cancel.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// One-to-one scan bookkeeping for a channel.
///
/// `forward_message_id` is the newest snowflake ever observed for the
/// channel, `backward_message_id` the oldest. The first successful page sets
/// both; continuations advance only the boundary matching the scan direction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelScanStatus {
    pub guild_id: String,
    pub channel_id: String,
    pub status: ScanState,
    pub forward_message_id: Option<String>,
    pub backward_message_id: Option<String>,
    pub message_count: i64,
    pub total_messages_scanned: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelScanStatus {
    /// True before the first successful page, when neither cursor is set.
    pub fn is_first_scan(&self) -> bool {
        self.forward_message_id.is_none() && self.backward_message_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_states() {
        assert!(ScanState::Queued.is_live());
        assert!(ScanState::Running.is_live());
        assert!(!ScanState::Succeeded.is_live());
        assert!(!ScanState::Failed.is_live());
        assert!(!ScanState::Cancelled.is_live());
    }
}
