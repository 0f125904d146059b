//! TRANSCODING poller.
//!
//! Every cutter polls the backend for rows in TRANSCODING, regardless
//! of which cutter uploaded them, and advances finished ones to DONE.
//! The guarded UPDATE makes concurrent pollers harmless: one wins, the
//! rest see zero rows.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use eventdb::EventState;
use uploads::UploadStatus;

use crate::CutterCtx;

pub async fn poll_loop(ctx: Arc<CutterCtx>, interval: Duration) {
    while !ctx.token.is_cancelled() {
        if let Err(e) = poll_once(&ctx).await {
            warn!(error = %e, "Transcoding poll failed");
        }
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn poll_once(ctx: &Arc<CutterCtx>) -> Result<(), eventdb::store::StoreError> {
    let rows = ctx.store.list_by_state(EventState::Transcoding).await?;
    for row in rows {
        let Some(location) = row
            .upload_location
            .as_deref()
            .and_then(|name| ctx.locations.get(name))
        else {
            // Another cutter's backend; not ours to poll.
            continue;
        };
        let Some(video_id) = row.video_id.as_deref() else {
            warn!(id = %row.id, "TRANSCODING row has no video id");
            continue;
        };

        match location.backend.query_status(video_id).await {
            Ok(UploadStatus::Done) => {
                if ctx.store.finish_transcoding(&row.id).await? {
                    info!(id = %row.id, video_id, "Transcoding finished");
                    ctx.metrics.inc("transcoding_advanced_total", &[]);
                }
            }
            Ok(UploadStatus::Transcoding) => {}
            Err(e) => {
                warn!(id = %row.id, video_id, error = %e, "Status query failed")
            }
        }
    }
    Ok(())
}
