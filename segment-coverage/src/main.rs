//! segment-coverage - periodic audit of the local archive.
//!
//! For each (channel, quality, hour) it renders a PNG map showing, at
//! 2-second resolution, which seconds are covered, with what segment
//! type, and where duplicates exist, plus an auto-refreshing HTML
//! index. Reads the archive only; no database, no network calls.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod coverage;
mod render;

/// Render per-hour coverage maps of the local archive.
#[derive(Debug, Parser)]
#[command(name = "segment-coverage", version)]
struct Args {
    /// Base directory of the segment archive.
    #[arg(long, env = "WUBLOADER_BASE_DIR")]
    base_dir: PathBuf,

    /// Channels to audit.
    #[arg(required = true)]
    channels: Vec<String>,

    /// Quality variants to audit.
    #[arg(long = "quality", default_value = "source")]
    qualities: Vec<String>,

    /// Where to write the maps; defaults to BASE_DIR/coverage.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seconds between audit passes.
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Metrics/health listen address.
    #[arg(long, default_value = "0.0.0.0:8004")]
    metrics_bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init_logging("segment_coverage=info,segments=info,common=info");
    let args = Args::parse();
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.base_dir.join("coverage"));

    let metrics = Arc::new(common::Metrics::new("segment_coverage"));
    metrics.describe("hours_audited_total", "Hour maps rendered");
    metrics.describe(
        "coverage_fraction",
        "Fraction of the most recent complete hour covered by any segment",
    );

    let token = CancellationToken::new();
    tokio::spawn(common::shutdown::cancel_on_signal(token.clone()));
    tokio::spawn(common::observe::serve(
        args.metrics_bind,
        metrics.clone(),
        token.clone(),
    ));

    info!(output = %output_dir.display(), "Starting coverage auditor");
    while !token.is_cancelled() {
        for channel in &args.channels {
            for quality in &args.qualities {
                if let Err(e) =
                    audit_one(&args.base_dir, &output_dir, channel, quality, &metrics).await
                {
                    warn!(channel, quality, error = %e, "Audit pass failed");
                }
            }
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(args.interval.max(5))) => {}
        }
    }

    info!("Coverage auditor shutdown complete");
    Ok(())
}

async fn audit_one(
    base_dir: &PathBuf,
    output_dir: &PathBuf,
    channel: &str,
    quality: &str,
    metrics: &Arc<common::Metrics>,
) -> anyhow::Result<()> {
    let hours = segments::list::list_hours(base_dir, channel, quality).await?;
    if hours.is_empty() {
        return Ok(());
    }

    let out = output_dir.join(channel).join(quality);
    common::fs::ensure_dir_all(&out).await?;

    for hour in &hours {
        let listed = segments::list::list_segments(base_dir, channel, quality, hour).await?;
        let hour_start = segments::parse_hour(hour)?;
        let map = coverage::CoverageMap::build(hour_start, &listed);

        let png = render::render_png(&map)?;
        let target = out.join(format!("{hour}.png"));
        let temp = out.join(format!(".{hour}.png.part"));
        tokio::fs::write(&temp, &png).await?;
        tokio::fs::rename(&temp, &target).await?;

        metrics.inc("hours_audited_total", &[("channel", channel)]);
    }

    // The most recent complete hour is the one before the newest bucket
    // (which is usually still filling).
    if hours.len() >= 2 {
        let hour = &hours[hours.len() - 2];
        let listed = segments::list::list_segments(base_dir, channel, quality, hour).await?;
        let map = coverage::CoverageMap::build(segments::parse_hour(hour)?, &listed);
        metrics.set_gauge(
            "coverage_fraction",
            &[("channel", channel), ("quality", quality)],
            map.covered_fraction(),
        );
    }

    let html = render::render_index(channel, quality, &hours);
    tokio::fs::write(out.join("index.html"), html).await?;
    Ok(())
}
