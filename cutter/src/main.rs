//! cutter - owns the lifecycle of cut-and-upload jobs.
//!
//! All work is database-driven: claim an `EDITED` row with an atomic
//! UPDATE, cut through the local restreamer, stream into the upload
//! backend, and walk the row through FINALIZING to TRANSCODING/DONE.
//! Separate pollers advance other cutters' TRANSCODING rows and service
//! the MODIFIED metadata path.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod claim;
mod job;
mod locations;
mod modify;
mod thumbs;
mod transcode;

/// Claim and execute cut-and-upload jobs.
#[derive(Debug, Parser)]
#[command(name = "cutter", version)]
struct Args {
    /// This cutter's name, recorded in the `uploader` column.
    #[arg(long, env = "WUBLOADER_NODE_NAME")]
    name: String,

    /// Shared database URL.
    #[arg(long, env = "WUBLOADER_DATABASE_URL")]
    database_url: String,

    /// Base directory of the local segment archive, used for coverage
    /// checks before claiming.
    #[arg(long, env = "WUBLOADER_BASE_DIR")]
    base_dir: PathBuf,

    /// The local restreamer executing the cuts.
    #[arg(long, env = "WUBLOADER_RESTREAMER_URL", default_value = "http://127.0.0.1:8000")]
    restreamer_url: url::Url,

    /// JSON file mapping upload location names to backend options.
    #[arg(long, env = "WUBLOADER_LOCATIONS_FILE")]
    locations_file: PathBuf,

    /// Directory holding thumbnail template images.
    #[arg(long)]
    templates_dir: Option<PathBuf>,

    /// Seconds between claim attempts when no work is eligible.
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,

    /// Seconds between TRANSCODING status polls.
    #[arg(long, default_value_t = 30)]
    transcode_interval: u64,

    /// Reset rows stuck in CLAIMED after this many seconds; 0 disables
    /// the sweep.
    #[arg(long, default_value_t = 0)]
    reclaim_after: u64,

    /// Metrics/health listen address.
    #[arg(long, default_value = "0.0.0.0:8003")]
    metrics_bind: SocketAddr,
}

pub struct CutterCtx {
    pub name: String,
    pub store: eventdb::EventStore,
    pub base_dir: PathBuf,
    pub restreamer_url: url::Url,
    pub locations: locations::Locations,
    pub templates_dir: PathBuf,
    pub client: reqwest::Client,
    pub metrics: Arc<common::Metrics>,
    pub token: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init_logging("cutter=info,eventdb=info,cutting=info,common=info");
    let args = Args::parse();

    let metrics = Arc::new(common::Metrics::new("cutter"));
    metrics.describe("jobs_total", "Jobs finished by outcome");
    metrics.describe("claims_lost_total", "Claims that raced and lost");
    metrics.describe("finalizing_stuck_total", "Jobs left in FINALIZING after an ambiguous commit");
    metrics.describe("transcoding_advanced_total", "TRANSCODING rows advanced to DONE");

    let locations = locations::Locations::load(&args.locations_file)?;
    info!(
        locations = locations.names().len(),
        "Loaded upload locations"
    );

    let pool = eventdb::create_pool(&args.database_url).await?;
    let store = eventdb::EventStore::new(pool);

    let token = CancellationToken::new();
    tokio::spawn(common::shutdown::cancel_on_signal(token.clone()));
    tokio::spawn(common::observe::serve(
        args.metrics_bind,
        metrics.clone(),
        token.clone(),
    ));

    let templates_dir = args
        .templates_dir
        .clone()
        .unwrap_or_else(|| args.base_dir.join("thumbnail-templates"));

    let ctx = Arc::new(CutterCtx {
        name: args.name.clone(),
        store,
        base_dir: args.base_dir.clone(),
        restreamer_url: args.restreamer_url.clone(),
        locations,
        templates_dir,
        // Cut responses stream for as long as the encode runs; no
        // overall timeout, only a connect timeout.
        client: common::http::build_client(None),
        metrics,
        token: token.clone(),
    });

    let transcoder = tokio::spawn(transcode::poll_loop(
        ctx.clone(),
        Duration::from_secs(args.transcode_interval.max(5)),
    ));
    let modifier = tokio::spawn(modify::poll_loop(
        ctx.clone(),
        Duration::from_secs(args.poll_interval.max(5)),
    ));
    let sweeper = (args.reclaim_after > 0).then(|| {
        tokio::spawn(claim::sweep_loop(
            ctx.clone(),
            chrono::Duration::seconds(args.reclaim_after as i64),
        ))
    });

    claim::claim_loop(ctx, Duration::from_secs(args.poll_interval.max(1))).await;

    let _ = transcoder.await;
    let _ = modifier.await;
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    info!("Cutter shutdown complete");
    Ok(())
}
