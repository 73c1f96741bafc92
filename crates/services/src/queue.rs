//! Job queue over Redis streams.
//!
//! Streams are named `jobs:guild:<guildId>:<jobType>` and discovered with
//! cursor-based SCAN rather than a blocking KEYS. Delivery is at-least-once:
//! consumers read through a consumer group, claim entries abandoned by
//! crashed workers first, and only xack+xdel after the job finishes.
//! Duplicate delivery is tolerated downstream (clip fingerprints and bulk
//! upserts are idempotent).

use redis::{
    aio::ConnectionManager,
    streams::{
        StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
        StreamReadReply,
    },
    AsyncCommands, RedisError,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::jobs::Job;

pub const STREAM_PREFIX: &str = "jobs";
const DEFAULT_MAXLEN: usize = 10_000;
const DEFAULT_MIN_IDLE_MS: usize = 60_000;
const CLAIM_BATCH: usize = 10;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Redis(#[from] RedisError),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error("Operation requires a consumer group")]
    NotAConsumer,
}

/// Indexed fields stored alongside the job body for operator filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryMetadata {
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub job_type: Option<String>,
    pub job_id: Option<String>,
}

/// Pending-entry statistics for a stream.
#[derive(Debug, Clone, Default)]
pub struct PendingInfo {
    pub total_pending: usize,
    pub oldest_pending_id: Option<String>,
    pub newest_pending_id: Option<String>,
    /// `(consumer name, entries pending)` pairs.
    pub consumers: Vec<(String, usize)>,
}

/// A delivered queue entry: where it came from plus the decoded body.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub stream_name: String,
    pub message_id: String,
    pub job: Job,
    pub metadata: EntryMetadata,
}

/// Build a structured stream name under the shared prefix.
///
/// `jobs:guild:123:batch`, `jobs:guild:123` (no job type), or `jobs`.
pub fn stream_name(guild_id: Option<&str>, job_type: Option<&str>) -> String {
    let mut parts = vec![STREAM_PREFIX.to_string()];
    if let Some(guild_id) = guild_id {
        parts.push("guild".into());
        parts.push(guild_id.to_string());
    }
    if let Some(job_type) = job_type {
        parts.push(job_type.to_string());
    }
    parts.join(":")
}

pub struct StreamQueue {
    conn: ConnectionManager,
    stream_pattern: String,
    consumer_group: Option<String>,
    consumer_name: Option<String>,
    maxlen: usize,
    min_idle_ms: usize,
}

impl StreamQueue {
    /// Connect to `REDIS_URL`. Pass a consumer group and name for workers;
    /// producers leave both `None`.
    pub async fn connect(
        stream_pattern: &str,
        consumer_group: Option<&str>,
        consumer_name: Option<&str>,
    ) -> Result<Self, QueueError> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let maxlen = std::env::var("REDIS_STREAM_MAXLEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAXLEN);

        info!("Connecting to Redis...");
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis connected");

        Ok(Self {
            conn,
            stream_pattern: stream_pattern.to_string(),
            consumer_group: consumer_group.map(str::to_string),
            consumer_name: consumer_name.map(str::to_string),
            maxlen,
            min_idle_ms: DEFAULT_MIN_IDLE_MS,
        })
    }

    /// Append a job to its stream. The stream name is derived from the job's
    /// guild id and type; the body is JSON plus indexed metadata fields.
    pub async fn push_job(&self, job: &Job) -> Result<String, QueueError> {
        let stream = stream_name(job.guild_id(), Some(job.job_type()));
        let body = job.encode()?;

        let fields = [
            ("job", body),
            ("guild_id", job.guild_id().unwrap_or("").to_string()),
            ("channel_id", job.channel_id().unwrap_or("").to_string()),
            ("job_type", job.job_type().to_string()),
            ("job_id", job.job_id().unwrap_or("").to_string()),
        ];

        self.ensure_consumer_group(&stream).await?;

        let mut conn = self.conn.clone();
        let message_id: String = conn
            .xadd_maxlen(&stream, StreamMaxlen::Approx(self.maxlen), "*", &fields)
            .await?;

        info!(
            "Pushed job {} to stream {}: {}",
            job.job_id().unwrap_or("unknown"),
            stream,
            message_id
        );
        Ok(message_id)
    }

    /// Create the consumer group if missing. BUSYGROUP responses mean the
    /// group already exists and are ignored.
    async fn ensure_consumer_group(&self, stream: &str) -> Result<(), QueueError> {
        let Some(group) = &self.consumer_group else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let result: Result<String, RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match result {
            Ok(_) => {
                debug!("Created consumer group '{}' for stream '{}'", group, stream);
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Cursor-based SCAN, iterated to completion before returning.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn matching_streams(&self) -> Result<Vec<String>, QueueError> {
        let pattern = format!("{}:{}", STREAM_PREFIX, self.stream_pattern);
        let keys = self.scan_keys(&pattern).await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(STREAM_PREFIX))
            .collect())
    }

    /// List job streams, optionally narrowed by guild and job type.
    pub async fn list_streams(
        &self,
        guild_id: Option<&str>,
        job_type: Option<&str>,
    ) -> Result<Vec<String>, QueueError> {
        let pattern = format!("{}*", stream_name(guild_id, job_type));
        let mut keys: Vec<String> = self
            .scan_keys(&pattern)
            .await?
            .into_iter()
            .filter(|k| k.starts_with(STREAM_PREFIX))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn decode_entry(stream_name: &str, entry: &StreamId) -> Result<QueuedJob, QueueError> {
        let body: String = entry.get("job").unwrap_or_default();
        let job = Job::decode(&body)?;
        Ok(QueuedJob {
            stream_name: stream_name.to_string(),
            message_id: entry.id.clone(),
            job,
            metadata: EntryMetadata {
                guild_id: entry.get("guild_id"),
                channel_id: entry.get("channel_id"),
                job_type: entry.get("job_type"),
                job_id: entry.get("job_id"),
            },
        })
    }

    /// Claim entries that have sat pending longer than `min_idle_ms`
    /// (abandoned by a crashed worker) and hand them to this consumer.
    async fn claim_pending(&self, streams: &[String]) -> Result<Vec<QueuedJob>, QueueError> {
        let (Some(group), Some(consumer)) = (&self.consumer_group, &self.consumer_name) else {
            return Ok(Vec::new());
        };

        let mut claimed_jobs = Vec::new();
        let mut conn = self.conn.clone();

        for stream in streams {
            let pending: StreamPendingCountReply = match conn
                .xpending_count(stream, group, "-", "+", CLAIM_BATCH)
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    debug!("Could not read pending entries from {}: {}", stream, err);
                    continue;
                }
            };

            for pending_id in &pending.ids {
                if pending_id.last_delivered_ms < self.min_idle_ms {
                    continue;
                }

                let claimed: StreamClaimReply = conn
                    .xclaim(
                        stream,
                        group,
                        consumer,
                        self.min_idle_ms,
                        &[&pending_id.id],
                    )
                    .await?;

                for entry in &claimed.ids {
                    match Self::decode_entry(stream, entry) {
                        Ok(job) => {
                            info!(
                                "Claimed stale job {} from stream {}",
                                job.metadata.job_id.as_deref().unwrap_or("unknown"),
                                stream
                            );
                            claimed_jobs.push(job);
                        }
                        Err(err) => {
                            // Undecodable entries can never succeed; drop them
                            // so they stop wedging the pending list.
                            error!("Failed to decode claimed job {}: {}", entry.id, err);
                            self.acknowledge(stream, &entry.id).await?;
                        }
                    }
                }
            }
        }

        Ok(claimed_jobs)
    }

    /// Read jobs from all matching streams. Pending reclaim runs first so
    /// recovery has priority over new work; otherwise blocks up to
    /// `block_ms` for fresh entries.
    pub async fn read_jobs(
        &self,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<QueuedJob>, QueueError> {
        let (Some(group), Some(consumer)) = (&self.consumer_group, &self.consumer_name) else {
            return Err(QueueError::NotAConsumer);
        };

        let streams = self.matching_streams().await?;
        if streams.is_empty() {
            return Ok(Vec::new());
        }

        for stream in &streams {
            self.ensure_consumer_group(stream).await?;
        }

        let pending = self.claim_pending(&streams).await?;
        if !pending.is_empty() {
            info!("Claimed {} pending job(s) from previous worker", pending.len());
            return Ok(pending);
        }

        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);

        let mut conn = self.conn.clone();
        let reply: StreamReadReply = conn.xread_options(&streams, &ids, &options).await?;

        let mut jobs = Vec::new();
        for key in &reply.keys {
            for entry in &key.ids {
                match Self::decode_entry(&key.key, entry) {
                    Ok(job) => jobs.push(job),
                    Err(err) => {
                        error!("Failed to decode job {}: {}", entry.id, err);
                        self.acknowledge(&key.key, &entry.id).await?;
                    }
                }
            }
        }
        Ok(jobs)
    }

    /// Number of entries currently in a stream.
    pub async fn stream_len(&self, stream: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.xlen(stream).await?)
    }

    /// Pending-entry summary for one stream, for operator monitoring.
    pub async fn pending_info(&self, stream: &str) -> Result<PendingInfo, QueueError> {
        let Some(group) = &self.consumer_group else {
            return Err(QueueError::NotAConsumer);
        };

        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingReply = conn.xpending(stream, group).await?;

        Ok(match reply {
            redis::streams::StreamPendingReply::Empty => PendingInfo::default(),
            redis::streams::StreamPendingReply::Data(data) => PendingInfo {
                total_pending: data.count,
                oldest_pending_id: Some(data.start_id),
                newest_pending_id: Some(data.end_id),
                consumers: data
                    .consumers
                    .into_iter()
                    .map(|c| (c.name, c.pending))
                    .collect(),
            },
        })
    }

    /// Acknowledge and delete a processed entry so stream memory follows
    /// consumption.
    pub async fn acknowledge(&self, stream: &str, message_id: &str) -> Result<(), QueueError> {
        let Some(group) = &self.consumer_group else {
            return Err(QueueError::NotAConsumer);
        };

        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[message_id]).await?;
        let deleted: i64 = conn.xdel(stream, &[message_id]).await?;
        if deleted == 0 {
            warn!("Entry {} already trimmed from {}", message_id, stream);
        }
        debug!("Acknowledged and deleted {} from {}", message_id, stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BatchScanJob, RescanMode, ScanDirection};
    use std::collections::HashMap;

    #[test]
    fn stream_names_follow_the_layout() {
        assert_eq!(stream_name(None, None), "jobs");
        assert_eq!(stream_name(Some("123"), None), "jobs:guild:123");
        assert_eq!(stream_name(Some("123"), Some("batch")), "jobs:guild:123:batch");
    }

    fn entry_with_fields(fields: &[(&str, &str)]) -> StreamId {
        let mut map = HashMap::new();
        for (key, value) in fields {
            map.insert(
                key.to_string(),
                redis::Value::BulkString(value.as_bytes().to_vec()),
            );
        }
        StreamId {
            id: "1700000000000-0".into(),
            map,
        }
    }

    #[test]
    fn entries_decode_into_jobs_with_metadata() {
        let job = Job::Batch(BatchScanJob {
            guild_id: "G1".into(),
            channel_id: "C1".into(),
            direction: ScanDirection::Backward,
            limit: 100,
            before_message_id: None,
            after_message_id: None,
            auto_continue: true,
            rescan: RescanMode::Stop,
            job_id: Some("j-1".into()),
            created_at: None,
        });
        let body = job.encode().unwrap();
        let entry = entry_with_fields(&[
            ("job", &body),
            ("guild_id", "G1"),
            ("channel_id", "C1"),
            ("job_type", "batch"),
            ("job_id", "j-1"),
        ]);

        let decoded = StreamQueue::decode_entry("jobs:guild:G1:batch", &entry).unwrap();
        assert_eq!(decoded.message_id, "1700000000000-0");
        assert_eq!(decoded.stream_name, "jobs:guild:G1:batch");
        assert_eq!(decoded.job, job);
        assert_eq!(decoded.metadata.guild_id.as_deref(), Some("G1"));
        assert_eq!(decoded.metadata.job_type.as_deref(), Some("batch"));
    }

    #[test]
    fn malformed_entries_fail_to_decode() {
        let entry = entry_with_fields(&[("job", "{not json")]);
        assert!(StreamQueue::decode_entry("jobs:guild:G1:batch", &entry).is_err());
    }
}
