//! Operator tool: inspect the job streams.
//!
//! Lists every stream under the shared prefix with its length and pending
//! summary for the worker consumer group.

use anyhow::Context;
use clap::Parser;

use services::queue::StreamQueue;

#[derive(Parser)]
#[command(name = "check-streams", about = "Inspect job streams and pending entries")]
struct Cli {
    /// Narrow the listing to one guild.
    #[arg(long)]
    guild_id: Option<String>,
    /// Narrow the listing to one job type (batch, message, ...).
    #[arg(long)]
    job_type: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let queue = StreamQueue::connect("*", Some("worker_group"), Some("check_streams"))
        .await
        .context("redis init failed")?;

    let streams = queue
        .list_streams(cli.guild_id.as_deref(), cli.job_type.as_deref())
        .await?;

    if streams.is_empty() {
        println!("No job streams found");
        return Ok(());
    }

    for stream in &streams {
        let length = queue.stream_len(stream).await?;
        let pending = queue.pending_info(stream).await?;

        println!("{stream}");
        println!("  queued: {length}, pending: {}", pending.total_pending);
        for (consumer, count) in &pending.consumers {
            println!("  consumer {consumer}: {count} pending");
        }
    }

    Ok(())
}
