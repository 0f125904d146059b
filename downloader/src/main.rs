//! downloader - archives an upstream live HLS stream.
//!
//! One worker per (channel, quality) polls the media playlist and
//! fetches every new segment into the content-addressed archive. The
//! downloader never touches the database; its only effect is on disk.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod fetch;
mod provider;
mod worker;

/// Archive an upstream live stream, one worker per (channel, quality).
#[derive(Debug, Parser)]
#[command(name = "downloader", version)]
struct Args {
    /// Base directory of the segment archive.
    #[arg(long, env = "WUBLOADER_BASE_DIR")]
    base_dir: PathBuf,

    /// Upstream base URL; the master playlist for channel C is fetched
    /// from UPSTREAM/C.m3u8.
    #[arg(long, env = "WUBLOADER_UPSTREAM")]
    upstream: url::Url,

    /// Channels to archive. Suffix a channel with `!` to mark it
    /// important: a shorter poll interval and an offline warning.
    #[arg(required = true)]
    channels: Vec<String>,

    /// Quality variants to archive for each channel.
    #[arg(long = "quality", default_value = "source")]
    qualities: Vec<String>,

    /// Optional token endpoint; fetched tokens are appended to upstream
    /// requests and refreshed on auth failures.
    #[arg(long)]
    auth_url: Option<url::Url>,

    /// Maximum concurrent segment downloads per worker.
    #[arg(long, default_value_t = 4)]
    fanout: usize,

    /// Metrics/health listen address.
    #[arg(long, default_value = "0.0.0.0:8001")]
    metrics_bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init_logging("downloader=info,segments=info,common=info");
    let args = Args::parse();

    let metrics = Arc::new(common::Metrics::new("downloader"));
    metrics.describe("segments_total", "Segments archived by kind");
    metrics.describe("segment_bytes_total", "Bytes archived");
    metrics.describe("playlist_fetches_total", "Playlist fetches by result");
    metrics.describe("segments_failed_total", "Segments abandoned after retries");

    let token = CancellationToken::new();
    tokio::spawn(common::shutdown::cancel_on_signal(token.clone()));
    tokio::spawn(common::observe::serve(
        args.metrics_bind,
        metrics.clone(),
        token.clone(),
    ));

    let upstream = Arc::new(provider::Upstream::new(
        args.upstream.clone(),
        args.auth_url.clone(),
    ));

    let mut workers = JoinSet::new();
    for channel_arg in &args.channels {
        let (channel, important) = match channel_arg.strip_suffix('!') {
            Some(name) => (name.to_string(), true),
            None => (channel_arg.clone(), false),
        };
        for quality in &args.qualities {
            let worker = worker::DownloadWorker {
                base_dir: args.base_dir.clone(),
                upstream: upstream.clone(),
                metrics: metrics.clone(),
                token: token.clone(),
                channel: channel.clone(),
                quality: quality.clone(),
                important,
                fanout: args.fanout.max(1),
            };
            info!(channel = %worker.channel, quality = %worker.quality, important, "Starting worker");
            workers.spawn(worker.run());
        }
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Worker task panicked");
        }
    }

    info!("Downloader shutdown complete");
    Ok(())
}
