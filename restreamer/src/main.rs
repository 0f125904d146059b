//! restreamer - read-side HTTP server over the local segment archive.
//!
//! Fully stateless with respect to the database: it knows only about
//! files on disk. Peers backfill through these same endpoints, so this
//! surface is also the replication protocol.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod api;
mod error;

/// Read-side HTTP server over the segment archive.
#[derive(Debug, Parser)]
#[command(name = "restreamer", version)]
struct Args {
    /// Base directory of the segment archive.
    #[arg(long, env = "WUBLOADER_BASE_DIR")]
    base_dir: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
}

#[derive(Clone)]
pub struct AppState {
    pub base_dir: PathBuf,
    pub metrics: Arc<common::Metrics>,
    pub token: CancellationToken,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init_logging("restreamer=info,segments=info,cutting=info,common=info");
    let args = Args::parse();

    let metrics = Arc::new(common::Metrics::new("restreamer"));
    metrics.describe("cuts_total", "Cut requests by type");

    let token = CancellationToken::new();
    tokio::spawn(common::shutdown::cancel_on_signal(token.clone()));

    let state = AppState {
        base_dir: args.base_dir,
        metrics: metrics.clone(),
        token: token.clone(),
    };

    let app = api::router(state).merge(common::observe::router(metrics));

    info!(addr = %args.bind, "Starting restreamer");
    let listener = TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;

    info!("Restreamer shutdown complete");
    Ok(())
}
