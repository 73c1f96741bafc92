//! Queue job bodies.
//!
//! Every entry on a stream carries a JSON-encoded job body whose `type`
//! field discriminates the variant, plus indexed metadata fields so
//! operators can filter streams without decoding bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    Backward,
    Forward,
}

impl Default for ScanDirection {
    fn default() -> Self {
        Self::Backward
    }
}

/// Policy for messages the scanner has already stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RescanMode {
    /// Drop known messages and stop continuation once any known id appears.
    Stop,
    /// Drop known messages but keep walking.
    Continue,
    /// Process known messages normally, forcing a refresh.
    Update,
}

impl Default for RescanMode {
    fn default() -> Self {
        Self::Stop
    }
}

fn default_limit() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchScanJob {
    pub guild_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub direction: ScanDirection,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub before_message_id: Option<String>,
    #[serde(default)]
    pub after_message_id: Option<String>,
    #[serde(default = "default_true")]
    pub auto_continue: bool,
    #[serde(default)]
    pub rescan: RescanMode,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageScanJob {
    pub guild_id: String,
    pub channel_id: String,
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescanJob {
    pub guild_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThumbnailRetryJob {
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Limit the retry batch to specific clips; `None` retries anything due.
    #[serde(default)]
    pub clip_ids: Option<Vec<String>>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDeletionJob {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurgeChannelJob {
    pub guild_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurgeGuildJob {
    pub guild_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    Batch(BatchScanJob),
    Message(MessageScanJob),
    Rescan(RescanJob),
    ThumbnailRetry(ThumbnailRetryJob),
    MessageDeletion(MessageDeletionJob),
    PurgeChannel(PurgeChannelJob),
    PurgeGuild(PurgeGuildJob),
}

impl Job {
    pub fn job_type(&self) -> &'static str {
        match self {
            Job::Batch(_) => "batch",
            Job::Message(_) => "message",
            Job::Rescan(_) => "rescan",
            Job::ThumbnailRetry(_) => "thumbnail_retry",
            Job::MessageDeletion(_) => "message_deletion",
            Job::PurgeChannel(_) => "purge_channel",
            Job::PurgeGuild(_) => "purge_guild",
        }
    }

    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Job::Batch(j) => Some(&j.guild_id),
            Job::Message(j) => Some(&j.guild_id),
            Job::Rescan(j) => Some(&j.guild_id),
            Job::ThumbnailRetry(j) => j.guild_id.as_deref(),
            Job::MessageDeletion(j) => Some(&j.guild_id),
            Job::PurgeChannel(j) => Some(&j.guild_id),
            Job::PurgeGuild(j) => Some(&j.guild_id),
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Job::Batch(j) => Some(&j.channel_id),
            Job::Message(j) => Some(&j.channel_id),
            Job::Rescan(j) => Some(&j.channel_id),
            Job::ThumbnailRetry(_) => None,
            Job::MessageDeletion(j) => Some(&j.channel_id),
            Job::PurgeChannel(j) => Some(&j.channel_id),
            Job::PurgeGuild(_) => None,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Job::Batch(j) => j.job_id.as_deref(),
            Job::Message(j) => j.job_id.as_deref(),
            Job::Rescan(j) => j.job_id.as_deref(),
            Job::ThumbnailRetry(j) => j.job_id.as_deref(),
            Job::MessageDeletion(j) => j.job_id.as_deref(),
            Job::PurgeChannel(j) => j.job_id.as_deref(),
            Job::PurgeGuild(j) => j.job_id.as_deref(),
        }
    }

    /// Stamp a fresh job id and creation time if the producer did not.
    pub fn with_identity(mut self) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        {
            let (job_id, created_at) = match &mut self {
                Job::Batch(j) => (&mut j.job_id, &mut j.created_at),
                Job::Message(j) => (&mut j.job_id, &mut j.created_at),
                Job::Rescan(j) => (&mut j.job_id, &mut j.created_at),
                Job::ThumbnailRetry(j) => (&mut j.job_id, &mut j.created_at),
                Job::MessageDeletion(j) => (&mut j.job_id, &mut j.created_at),
                Job::PurgeChannel(j) => (&mut j.job_id, &mut j.created_at),
                Job::PurgeGuild(j) => (&mut j.job_id, &mut j.created_at),
            };
            if job_id.is_none() {
                *job_id = Some(id);
            }
            if created_at.is_none() {
                *created_at = Some(now);
            }
        }
        self
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Job> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_jobs() -> Vec<Job> {
        vec![
            Job::Batch(BatchScanJob {
                guild_id: "g1".into(),
                channel_id: "c1".into(),
                direction: ScanDirection::Backward,
                limit: 100,
                before_message_id: Some("123".into()),
                after_message_id: None,
                auto_continue: true,
                rescan: RescanMode::Stop,
                job_id: Some("job-1".into()),
                created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            }),
            Job::Message(MessageScanJob {
                guild_id: "g1".into(),
                channel_id: "c1".into(),
                message_ids: vec!["1".into(), "2".into()],
                job_id: None,
                created_at: None,
            }),
            Job::Rescan(RescanJob {
                guild_id: "g1".into(),
                channel_id: "c1".into(),
                reason: Some("settings changed".into()),
                job_id: None,
                created_at: None,
            }),
            Job::ThumbnailRetry(ThumbnailRetryJob {
                guild_id: Some("g1".into()),
                clip_ids: Some(vec!["abc".into()]),
                job_id: None,
                created_at: None,
            }),
            Job::MessageDeletion(MessageDeletionJob {
                guild_id: "g1".into(),
                channel_id: "c1".into(),
                message_id: "m1".into(),
                job_id: None,
                created_at: None,
            }),
            Job::PurgeChannel(PurgeChannelJob {
                guild_id: "g1".into(),
                channel_id: "c1".into(),
                job_id: None,
                created_at: None,
            }),
            Job::PurgeGuild(PurgeGuildJob {
                guild_id: "g1".into(),
                job_id: None,
                created_at: None,
            }),
        ]
    }

    #[test]
    fn round_trip_all_variants() {
        for job in sample_jobs() {
            let encoded = job.encode().unwrap();
            let decoded = Job::decode(&encoded).unwrap();
            assert_eq!(job, decoded);
        }
    }

    #[test]
    fn type_discriminator_matches_job_type() {
        for job in sample_jobs() {
            let encoded = job.encode().unwrap();
            let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
            assert_eq!(value["type"], job.job_type());
        }
    }

    #[test]
    fn created_at_round_trips_in_utc() {
        let job = Job::Batch(BatchScanJob {
            guild_id: "g".into(),
            channel_id: "c".into(),
            direction: ScanDirection::Forward,
            limit: 50,
            before_message_id: None,
            after_message_id: Some("42".into()),
            auto_continue: false,
            rescan: RescanMode::Update,
            job_id: None,
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        });
        let decoded = Job::decode(&job.encode().unwrap()).unwrap();
        match decoded {
            Job::Batch(j) => {
                assert_eq!(
                    j.created_at,
                    Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
                );
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn batch_defaults_apply_on_sparse_input() {
        let job = Job::decode(r#"{"type":"batch","guild_id":"g","channel_id":"c"}"#).unwrap();
        match job {
            Job::Batch(j) => {
                assert_eq!(j.direction, ScanDirection::Backward);
                assert_eq!(j.limit, 100);
                assert!(j.auto_continue);
                assert_eq!(j.rescan, RescanMode::Stop);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn with_identity_preserves_existing_ids() {
        let job = Job::PurgeGuild(PurgeGuildJob {
            guild_id: "g".into(),
            job_id: Some("keep-me".into()),
            created_at: None,
        })
        .with_identity();
        assert_eq!(job.job_id(), Some("keep-me"));
    }
}
