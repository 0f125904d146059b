//! Candidate selection and the atomic claim.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use eventdb::Event;
use segments::select::select_segments;

use crate::CutterCtx;
use crate::job;

/// Main loop: find an eligible row, claim it, run it, repeat.
pub async fn claim_loop(ctx: Arc<CutterCtx>, poll_interval: Duration) {
    while !ctx.token.is_cancelled() {
        match next_job(&ctx).await {
            Ok(Some(event)) => {
                job::run_job(&ctx, event).await;
                // Immediately look for more work.
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Claim cycle failed"),
        }
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Select and claim at most one candidate row.
///
/// The SQL pre-filters state, location, and allow-list; rows that need
/// full local coverage are checked against the archive here. The claim
/// itself is the atomic UPDATE; losing it just means another cutter
/// won, so we move on to the next candidate.
async fn next_job(ctx: &Arc<CutterCtx>) -> Result<Option<Event>, eventdb::store::StoreError> {
    let candidates = ctx
        .store
        .list_claimable(&ctx.name, &ctx.locations.names())
        .await?;

    for candidate in candidates {
        if !candidate.allow_holes && !coverage_ok(ctx, &candidate).await {
            continue;
        }
        match ctx.store.try_claim(&candidate.id, &ctx.name).await? {
            Some(claimed) => {
                info!(id = %claimed.id, "Claimed event");
                return Ok(Some(claimed));
            }
            None => {
                ctx.metrics.inc("claims_lost_total", &[]);
            }
        }
    }
    Ok(None)
}

/// Verify the local archive fully covers every requested range.
async fn coverage_ok(ctx: &Arc<CutterCtx>, event: &Event) -> bool {
    let (Some(channel), Some(quality), Some(ranges)) = (
        event.video_channel.as_deref(),
        event.video_quality.as_deref(),
        event.video_ranges.as_ref(),
    ) else {
        // Malformed rows are claimed anyway so the validation error is
        // reported on the row instead of being silently skipped forever.
        return true;
    };

    for range in &ranges.0 {
        let mut hours = Vec::new();
        let mut cursor = range.start - ChronoDuration::hours(1);
        while cursor <= range.end {
            hours.push(segments::path::format_hour(cursor));
            cursor += ChronoDuration::hours(1);
        }
        let available = match segments::list::list_segments_in_hours(
            &ctx.base_dir,
            channel,
            quality,
            &hours,
        )
        .await
        {
            Ok(available) => available,
            Err(e) => {
                warn!(id = %event.id, error = %e, "Coverage check failed");
                return false;
            }
        };
        let selection = select_segments(&available, range.start, range.end);
        if !selection.holes.is_empty() {
            return false;
        }
    }
    true
}

/// Operator-timeout sweep for rows stuck in CLAIMED.
pub async fn sweep_loop(ctx: Arc<CutterCtx>, older_than: ChronoDuration) {
    let interval = Duration::from_secs(60);
    while !ctx.token.is_cancelled() {
        if let Err(e) = ctx.store.reset_stale_claims(older_than).await {
            warn!(error = %e, "Stale-claim sweep failed");
        }
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
