//! Chat-platform client boundary.
//!
//! The worker talks to the platform through this trait so scan logic stays
//! testable; the serenity-backed implementation lives in [`serenity_client`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use db::models::ChannelKind;
use services::jobs::ScanDirection;

pub mod retry;
pub mod serenity_client;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited")]
    RateLimited { retry_after: Option<f64> },
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
}

impl PlatformError {
    /// 429s and server errors are worth retrying; permission and existence
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::RateLimited { .. } => true,
            PlatformError::Api { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformUser {
    pub id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMember {
    pub user: PlatformUser,
    pub nickname: Option<String>,
    pub guild_avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformAttachment {
    pub filename: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMessage {
    pub id: String,
    pub author: PlatformUser,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<PlatformAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformChannel {
    pub id: String,
    pub guild_id: Option<String>,
    pub name: String,
    pub kind: ChannelKind,
    /// False for channel types whose history cannot be paged (categories,
    /// forums).
    pub supports_history: bool,
}

/// One history page request. `before` pages backward from the edge,
/// `after` forward; pages come back newest-first for backward scans and
/// oldest-first for forward scans.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub direction: ScanDirection,
    pub limit: u32,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn fetch_channel(&self, channel_id: &str) -> Result<PlatformChannel, PlatformError>;

    async fn fetch_history(
        &self,
        channel_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<PlatformMessage>, PlatformError>;

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<PlatformMessage, PlatformError>;

    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<PlatformMember, PlatformError>;

    async fn leave_guild(&self, guild_id: &str) -> Result<(), PlatformError>;
}

/// Fetch one history page with retries, then pace the worker so sustained
/// scans stay under the platform's rate limits.
pub async fn fetch_history_page(
    client: &dyn PlatformClient,
    channel_id: &str,
    query: &HistoryQuery,
) -> Result<Vec<PlatformMessage>, PlatformError> {
    let config = retry::PlatformRetryConfig::default();
    let messages =
        retry::execute_with_retry(&config, || client.fetch_history(channel_id, query)).await?;

    let pace = retry::pace_duration(messages.len());
    if !pace.is_zero() {
        tracing::debug!(
            "Fetched {} message(s); pacing {:.2}s",
            messages.len(),
            pace.as_secs_f64()
        );
        tokio::time::sleep(pace).await;
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_status_class() {
        assert!(PlatformError::RateLimited { retry_after: Some(1.0) }.is_retryable());
        assert!(PlatformError::Api { status: 502, message: "bad gateway".into() }.is_retryable());
        assert!(!PlatformError::Api { status: 400, message: "bad request".into() }.is_retryable());
        assert!(!PlatformError::Forbidden("no access".into()).is_retryable());
        assert!(!PlatformError::NotFound("gone".into()).is_retryable());
        assert!(!PlatformError::Transport("reset".into()).is_retryable());
    }
}
