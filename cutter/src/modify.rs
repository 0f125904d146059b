//! The MODIFIED path: metadata and thumbnail updates to already
//! published videos.
//!
//! Rows enter MODIFIED when an operator edits a DONE video. Any cutter
//! whose locations include the row's destination claims it with the
//! same atomic UPDATE pattern, pushes the new metadata, re-uploads the
//! thumbnail only when its hash changed, and returns the row to DONE.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use eventdb::{Event, EventState};
use uploads::VideoMeta;

use crate::CutterCtx;
use crate::thumbs;

pub async fn poll_loop(ctx: Arc<CutterCtx>, interval: Duration) {
    while !ctx.token.is_cancelled() {
        if let Err(e) = poll_once(&ctx).await {
            warn!(error = %e, "MODIFIED poll failed");
        }
        tokio::select! {
            _ = ctx.token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn poll_once(ctx: &Arc<CutterCtx>) -> Result<(), eventdb::store::StoreError> {
    let rows = ctx.store.list_by_state(EventState::Modified).await?;
    for row in rows {
        if row.uploader.is_some() {
            // Another cutter is already on it.
            continue;
        }
        let Some(location_name) = row.upload_location.as_deref() else {
            continue;
        };
        if ctx.locations.get(location_name).is_none() {
            continue;
        }

        let Some(claimed) = ctx.store.try_claim_modified(&row.id, &ctx.name).await? else {
            continue;
        };
        service_row(ctx, claimed).await?;
    }
    Ok(())
}

async fn service_row(
    ctx: &Arc<CutterCtx>,
    row: Event,
) -> Result<(), eventdb::store::StoreError> {
    let location = ctx
        .locations
        .get(row.upload_location.as_deref().unwrap_or_default())
        .cloned();
    let Some(location) = location else {
        ctx.store
            .modify_failed(&row.id, "upload location not configured on this cutter")
            .await?;
        return Ok(());
    };

    // A destination that cannot mutate metadata is operator error,
    // rejected at claim time.
    if !location.backend.supports_metadata_edit() {
        ctx.store
            .modify_failed(
                &row.id,
                &format!(
                    "backend {} does not support metadata modification",
                    location.backend.kind()
                ),
            )
            .await?;
        return Ok(());
    }

    let Some(video_id) = row.video_id.clone() else {
        ctx.store
            .modify_failed(&row.id, "MODIFIED row has no video id")
            .await?;
        return Ok(());
    };

    let meta = VideoMeta {
        title: row.video_title.clone().unwrap_or_default(),
        description: row.video_description.clone().unwrap_or_default(),
        tags: row
            .video_tags
            .as_ref()
            .map(|t| t.0.clone())
            .unwrap_or_default(),
        public: row.public,
        container: String::new(),
    };

    if let Err(e) = location.backend.modify_metadata(&video_id, &meta).await {
        warn!(id = %row.id, error = %e, "Metadata modification failed");
        ctx.store.modify_failed(&row.id, &e.to_string()).await?;
        return Ok(());
    }

    // Thumbnail only when the rendered image actually changed.
    let new_hash = match thumbs::render_for_event(ctx, &row).await {
        Ok(Some((png, hash))) => {
            if row.thumbnail_last_written.as_deref() != Some(hash.as_str()) {
                if let Err(e) = location.backend.set_thumbnail(&video_id, &png).await {
                    warn!(id = %row.id, error = %e, "Thumbnail update failed");
                    ctx.store.modify_failed(&row.id, &e.to_string()).await?;
                    return Ok(());
                }
                Some(hash)
            } else {
                None
            }
        }
        Ok(None) => None,
        Err(e) => {
            warn!(id = %row.id, error = %e, "Thumbnail rendering failed");
            ctx.store.modify_failed(&row.id, &e.to_string()).await?;
            return Ok(());
        }
    };

    ctx.store.finish_modify(&row.id, new_hash.as_deref()).await?;
    info!(id = %row.id, video_id, "Metadata update pushed");
    Ok(())
}
