//! Operator tool: validate a channel and append a job to its stream.
//!
//! Checks that the guild and channel rows exist and resolves the effective
//! settings before enqueueing, so a typo'd id fails here instead of inside
//! a worker.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use db::repositories::{ChannelRepository, GuildRepository};
use db::DBService;
use services::jobs::{
    BatchScanJob, Job, MessageScanJob, RescanMode, ScanDirection, ThumbnailRetryJob,
};
use services::queue::StreamQueue;
use services::settings::SettingsResolver;

#[derive(Parser)]
#[command(name = "push-job", about = "Append a job to the worker queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a history scan for a channel.
    Batch {
        guild_id: String,
        channel_id: String,
        #[arg(long, default_value = "backward")]
        direction: String,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        after: Option<String>,
        #[arg(long, default_value = "stop")]
        rescan: String,
        /// Do not enqueue continuation jobs when pages fill.
        #[arg(long)]
        no_continue: bool,
    },
    /// Enqueue specific messages for processing.
    Message {
        guild_id: String,
        channel_id: String,
        #[arg(required = true)]
        message_ids: Vec<String>,
    },
    /// Enqueue a retry pass over failed thumbnails.
    ThumbnailRetry {
        #[arg(long)]
        guild_id: Option<String>,
        clip_ids: Vec<String>,
    },
}

fn parse_direction(raw: &str) -> anyhow::Result<ScanDirection> {
    match raw {
        "backward" => Ok(ScanDirection::Backward),
        "forward" => Ok(ScanDirection::Forward),
        other => bail!("invalid direction '{other}' (expected backward or forward)"),
    }
}

fn parse_rescan(raw: &str) -> anyhow::Result<RescanMode> {
    match raw {
        "stop" => Ok(RescanMode::Stop),
        "continue" => Ok(RescanMode::Continue),
        "update" => Ok(RescanMode::Update),
        other => bail!("invalid rescan mode '{other}' (expected stop, continue or update)"),
    }
}

async fn validate_channel(db: &DBService, guild_id: &str, channel_id: &str) -> anyhow::Result<()> {
    let Some(guild) = GuildRepository::find_by_id(&db.pool, guild_id).await? else {
        bail!("guild {guild_id} not found in database; sync guilds first");
    };
    let Some(channel) = ChannelRepository::find_by_id(&db.pool, channel_id).await? else {
        bail!("channel {channel_id} not found in guild {guild_id}; sync channels first");
    };

    let resolver = SettingsResolver::new(db.pool.clone());
    let settings = resolver.resolve(guild_id, channel_id).await?;

    println!("Guild: {} ({})", guild.name, guild.id);
    println!("Channel: {} ({})", channel.name, channel.id);
    println!("Allowed MIME types: {:?}", settings.allowed_mime_types());
    println!("Match regex: {}", settings.match_regex().unwrap_or("none"));
    println!(
        "Store message content: {}",
        settings.enable_message_content_storage()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let db = DBService::new().await.context("database init failed")?;
    let queue = StreamQueue::connect("*", None, None)
        .await
        .context("redis init failed")?;

    let job = match &cli.command {
        Command::Batch {
            guild_id,
            channel_id,
            direction,
            limit,
            before,
            after,
            rescan,
            no_continue,
        } => {
            validate_channel(&db, guild_id, channel_id).await?;
            Job::Batch(BatchScanJob {
                guild_id: guild_id.clone(),
                channel_id: channel_id.clone(),
                direction: parse_direction(direction)?,
                limit: *limit,
                before_message_id: before.clone(),
                after_message_id: after.clone(),
                auto_continue: !no_continue,
                rescan: parse_rescan(rescan)?,
                job_id: None,
                created_at: None,
            })
        }
        Command::Message {
            guild_id,
            channel_id,
            message_ids,
        } => {
            validate_channel(&db, guild_id, channel_id).await?;
            Job::Message(MessageScanJob {
                guild_id: guild_id.clone(),
                channel_id: channel_id.clone(),
                message_ids: message_ids.clone(),
                job_id: None,
                created_at: None,
            })
        }
        Command::ThumbnailRetry { guild_id, clip_ids } => Job::ThumbnailRetry(ThumbnailRetryJob {
            guild_id: guild_id.clone(),
            clip_ids: if clip_ids.is_empty() {
                None
            } else {
                Some(clip_ids.clone())
            },
            job_id: None,
            created_at: None,
        }),
    };

    let job = job.with_identity();
    let message_id = queue.push_job(&job).await?;

    println!(
        "Pushed {} job {} (stream entry {})",
        job.job_type(),
        job.job_id().unwrap_or("unknown"),
        message_id
    );

    db.close().await;
    Ok(())
}
