//! serenity-backed platform client.
//!
//! Only the REST surface is used; the gateway is owned by the bot process,
//! not the worker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serenity::{
    http::{Http, HttpError, MessagePagination},
    model::prelude::*,
};

use db::models::ChannelKind;
use services::jobs::ScanDirection;

use super::{
    HistoryQuery, PlatformAttachment, PlatformChannel, PlatformClient, PlatformError,
    PlatformMember, PlatformMessage, PlatformUser,
};

pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    pub fn from_http(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn parse_snowflake(raw: &str) -> Result<u64, PlatformError> {
    // Id constructors reject zero, so a zero snowflake is invalid too.
    match raw.parse() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(PlatformError::NotFound(format!("invalid snowflake: {raw}"))),
    }
}

fn map_error(err: serenity::Error) -> PlatformError {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            match response.status_code.as_u16() {
                403 => PlatformError::Forbidden(response.error.message),
                404 => PlatformError::NotFound(response.error.message),
                429 => PlatformError::RateLimited { retry_after: None },
                status => PlatformError::Api {
                    status,
                    message: response.error.message,
                },
            }
        }
        other => PlatformError::Transport(other.to_string()),
    }
}

fn map_user(user: &User) -> PlatformUser {
    PlatformUser {
        id: user.id.to_string(),
        username: user.name.clone(),
        discriminator: user.discriminator.map(|d| format!("{:04}", d.get())),
        display_name: user
            .global_name
            .as_deref()
            .unwrap_or(&user.name)
            .to_string(),
        avatar_url: user.avatar_url(),
    }
}

fn map_message(message: &Message) -> PlatformMessage {
    PlatformMessage {
        id: message.id.to_string(),
        author: map_user(&message.author),
        content: message.content.clone(),
        timestamp: message.timestamp.with_timezone(&Utc),
        attachments: message
            .attachments
            .iter()
            .map(|a| PlatformAttachment {
                filename: a.filename.clone(),
                size: a.size as i64,
                content_type: a.content_type.clone(),
                url: a.url.clone(),
            })
            .collect(),
    }
}

fn map_channel_kind(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Voice | ChannelType::Stage => ChannelKind::Voice,
        ChannelType::Category => ChannelKind::Category,
        ChannelType::Forum => ChannelKind::Forum,
        _ => ChannelKind::Text,
    }
}

fn supports_history(kind: ChannelType) -> bool {
    !matches!(
        kind,
        ChannelType::Category | ChannelType::Forum | ChannelType::Directory
    )
}

#[async_trait]
impl PlatformClient for SerenityPlatform {
    async fn fetch_channel(&self, channel_id: &str) -> Result<PlatformChannel, PlatformError> {
        let id = ChannelId::new(parse_snowflake(channel_id)?);
        let channel = self.http.get_channel(id).await.map_err(map_error)?;

        match channel {
            Channel::Guild(guild_channel) => Ok(PlatformChannel {
                id: guild_channel.id.to_string(),
                guild_id: Some(guild_channel.guild_id.to_string()),
                name: guild_channel.name.clone(),
                kind: map_channel_kind(guild_channel.kind),
                supports_history: supports_history(guild_channel.kind),
            }),
            Channel::Private(private) => Ok(PlatformChannel {
                id: private.id.to_string(),
                guild_id: None,
                name: private.name(),
                kind: ChannelKind::Text,
                supports_history: true,
            }),
            _ => Err(PlatformError::NotFound(format!(
                "channel {channel_id} has an unsupported type"
            ))),
        }
    }

    /// Page through channel history until `limit` messages are collected or
    /// the channel runs out. The REST API caps one request at 100 messages,
    /// so larger limits walk multiple requests with an advancing cursor.
    /// Backward scans return newest-first, forward scans oldest-first.
    async fn fetch_history(
        &self,
        channel_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        let id = ChannelId::new(parse_snowflake(channel_id)?);

        let mut cursor = match query.direction {
            ScanDirection::Backward => query.before.as_deref().map(parse_snowflake).transpose()?,
            // A forward scan with no cursor starts at the beginning of the
            // channel, not at the newest messages.
            ScanDirection::Forward => query
                .after
                .as_deref()
                .map(parse_snowflake)
                .transpose()?
                .or(Some(1)),
        };

        let mut collected: Vec<PlatformMessage> = Vec::new();
        let mut remaining = query.limit;

        while remaining > 0 {
            let request_limit = remaining.min(100) as u8;
            let target = cursor.map(|edge| match query.direction {
                ScanDirection::Backward => MessagePagination::Before(MessageId::new(edge)),
                ScanDirection::Forward => MessagePagination::After(MessageId::new(edge)),
            });

            // The API returns each page newest-first.
            let mut page = self
                .http
                .get_messages(id, target, Some(request_limit))
                .await
                .map_err(map_error)?;
            if page.is_empty() {
                break;
            }
            if query.direction == ScanDirection::Forward {
                page.reverse();
            }

            let page_len = page.len();
            // The last element is the page edge in scan order: oldest for
            // backward, newest for forward.
            cursor = page.last().map(|m| m.id.get());

            collected.extend(page.iter().map(map_message));
            remaining = remaining.saturating_sub(page_len as u32);

            if page_len < request_limit as usize {
                break;
            }
        }

        Ok(collected)
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<PlatformMessage, PlatformError> {
        let channel = ChannelId::new(parse_snowflake(channel_id)?);
        let message = MessageId::new(parse_snowflake(message_id)?);
        let fetched = self
            .http
            .get_message(channel, message)
            .await
            .map_err(map_error)?;
        Ok(map_message(&fetched))
    }

    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<PlatformMember, PlatformError> {
        let guild = GuildId::new(parse_snowflake(guild_id)?);
        let user = UserId::new(parse_snowflake(user_id)?);
        let member = self
            .http
            .get_member(guild, user)
            .await
            .map_err(map_error)?;

        Ok(PlatformMember {
            guild_avatar_url: member.avatar_url().or_else(|| member.user.avatar_url()),
            nickname: member.nick.clone(),
            user: map_user(&member.user),
        })
    }

    async fn leave_guild(&self, guild_id: &str) -> Result<(), PlatformError> {
        let guild = GuildId::new(parse_snowflake(guild_id)?);
        self.http.leave_guild(guild).await.map_err(map_error)
    }
}
