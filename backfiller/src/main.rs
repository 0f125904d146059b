//! backfiller - pulls missing segments from peer restreamers.
//!
//! For each peer x (channel, quality) an independent worker diffs hour
//! listings against the local archive and fetches what is missing,
//! newest hours first so the live tail converges fastest. Every fetched
//! segment is verified against the hash its filename declares.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

mod peers;
mod worker;

/// Pull missing segments from peer nodes.
#[derive(Debug, Parser)]
#[command(name = "backfiller", version)]
struct Args {
    /// Base directory of the segment archive.
    #[arg(long, env = "WUBLOADER_BASE_DIR")]
    base_dir: PathBuf,

    /// This node's name; never backfills from itself.
    #[arg(long, env = "WUBLOADER_NODE_NAME", default_value = "localhost")]
    node_name: String,

    /// Static peer restreamer URLs. Ignored when --database-url is set.
    #[arg(long = "peer")]
    peers: Vec<Url>,

    /// Database to read the nodes table from; overrides --peer.
    #[arg(long, env = "WUBLOADER_DATABASE_URL")]
    database_url: Option<String>,

    /// Channels to backfill.
    #[arg(required = true)]
    channels: Vec<String>,

    /// Quality variants to backfill.
    #[arg(long = "quality", default_value = "source")]
    qualities: Vec<String>,

    /// Auxiliary directories to mirror by plain name diff.
    #[arg(long = "extra-dir")]
    extra_dirs: Vec<String>,

    /// Lookback horizon: only hours within this many hours of now are
    /// backfilled.
    #[arg(long, default_value_t = 48)]
    max_hours_ago: i64,

    /// Concurrent segment downloads per worker.
    #[arg(long, default_value_t = 4)]
    fanout: usize,

    /// Seconds between passes over the most recent hour.
    #[arg(long, default_value_t = 15)]
    recent_interval: u64,

    /// Every Nth pass walks the whole lookback window.
    #[arg(long, default_value_t = 8)]
    full_pass_every: u64,

    /// How often to re-read the peer set.
    #[arg(long, default_value_t = 300)]
    peer_refresh_interval: u64,

    /// Metrics/health listen address.
    #[arg(long, default_value = "0.0.0.0:8002")]
    metrics_bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init_logging("backfiller=info,segments=info,common=info");
    let args = Args::parse();

    let metrics = Arc::new(common::Metrics::new("backfiller"));
    metrics.describe("segments_fetched_total", "Segments pulled from peers");
    metrics.describe("hash_mismatches_total", "Fetched segments discarded on hash mismatch");
    metrics.describe("pass_failures_total", "Backfill passes that errored, by peer");
    metrics.describe("extra_files_fetched_total", "Auxiliary files pulled from peers");

    let token = CancellationToken::new();
    tokio::spawn(common::shutdown::cancel_on_signal(token.clone()));
    tokio::spawn(common::observe::serve(
        args.metrics_bind,
        metrics.clone(),
        token.clone(),
    ));

    let source = match &args.database_url {
        Some(url) => {
            let pool = eventdb::create_pool(url).await?;
            peers::PeerSource::database(eventdb::EventStore::new(pool), args.node_name.clone())
        }
        None => peers::PeerSource::from_urls(&args.peers, &args.node_name)?,
    };

    let shared = Arc::new(worker::SharedConfig {
        base_dir: args.base_dir.clone(),
        client: common::http::build_client(Some(Duration::from_secs(60))),
        metrics: metrics.clone(),
        max_hours_ago: args.max_hours_ago,
        fanout: args.fanout.max(1),
        recent_interval: Duration::from_secs(args.recent_interval.max(1)),
        full_pass_every: args.full_pass_every.max(1),
    });

    // Workers are keyed by (peer, channel, quality); the peer set can
    // change at runtime, so re-reconcile on an interval.
    let mut running: std::collections::HashSet<String> = Default::default();
    let mut workers = JoinSet::new();
    loop {
        match source.peers().await {
            Ok(peer_list) => {
                for peer in peer_list {
                    for channel in &args.channels {
                        for quality in &args.qualities {
                            let key = format!("{}|{channel}|{quality}", peer.name);
                            if !running.insert(key) {
                                continue;
                            }
                            info!(peer = %peer.name, channel, quality, "Starting backfill worker");
                            workers.spawn(
                                worker::BackfillWorker {
                                    shared: shared.clone(),
                                    token: token.clone(),
                                    peer: peer.clone(),
                                    channel: channel.clone(),
                                    quality: quality.clone(),
                                }
                                .run(),
                            );
                        }
                    }
                    for dir in &args.extra_dirs {
                        let key = format!("{}|extras|{dir}", peer.name);
                        if !running.insert(key) {
                            continue;
                        }
                        workers.spawn(
                            worker::ExtrasWorker {
                                shared: shared.clone(),
                                token: token.clone(),
                                peer: peer.clone(),
                                dir: dir.clone(),
                            }
                            .run(),
                        );
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not resolve peer set"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(args.peer_refresh_interval.max(10))) => {}
        }
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Worker task panicked");
        }
    }
    info!("Backfiller shutdown complete");
    Ok(())
}
