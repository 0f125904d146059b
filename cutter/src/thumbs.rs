//! Thumbnail rendering for events.
//!
//! BARE and TEMPLATE modes decode their frame via the local
//! restreamer's frame endpoint; CUSTOM uses the image stored on the
//! row. The rendered PNG's hash feeds change detection against
//! `thumbnail_last_written`.

use std::sync::Arc;
use thiserror::Error;

use cutting::thumbnail::{ThumbnailSpec, render_thumbnail, thumbnail_hash};
use eventdb::{Event, ThumbnailMode};

use crate::CutterCtx;

#[derive(Debug, Error)]
pub enum ThumbError {
    #[error("event wants a {mode:?} thumbnail but has no {missing}")]
    Incomplete {
        mode: ThumbnailMode,
        missing: &'static str,
    },

    #[error("fetching frame: {0}")]
    Frame(String),

    #[error("reading template {name:?}: {source}")]
    Template {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Render(#[from] cutting::CutError),
}

/// Render the thumbnail an event asks for. `Ok(None)` for mode NONE.
pub async fn render_for_event(
    ctx: &Arc<CutterCtx>,
    event: &Event,
) -> Result<Option<(Vec<u8>, String)>, ThumbError> {
    let spec = match event.thumbnail_mode {
        ThumbnailMode::None => return Ok(None),
        ThumbnailMode::Bare => ThumbnailSpec::Bare,
        ThumbnailMode::Custom => {
            let image = event
                .thumbnail_image
                .clone()
                .ok_or(ThumbError::Incomplete {
                    mode: ThumbnailMode::Custom,
                    missing: "thumbnail image",
                })?;
            ThumbnailSpec::Custom(image)
        }
        ThumbnailMode::Template => {
            let name = event
                .thumbnail_template
                .as_deref()
                .ok_or(ThumbError::Incomplete {
                    mode: ThumbnailMode::Template,
                    missing: "template name",
                })?;
            let crop = event.thumbnail_crop.as_ref().ok_or(ThumbError::Incomplete {
                mode: ThumbnailMode::Template,
                missing: "crop",
            })?;
            let location = event
                .thumbnail_location
                .as_ref()
                .ok_or(ThumbError::Incomplete {
                    mode: ThumbnailMode::Template,
                    missing: "placement",
                })?;

            let path = ctx.templates_dir.join(format!("{name}.png"));
            let template_png =
                tokio::fs::read(&path)
                    .await
                    .map_err(|source| ThumbError::Template {
                        name: name.to_string(),
                        source,
                    })?;
            ThumbnailSpec::Template {
                template_png,
                crop: rect(&crop.0),
                location: rect(&location.0),
            }
        }
    };

    let frame = match &spec {
        // CUSTOM ignores the frame entirely.
        ThumbnailSpec::Custom(_) => Vec::new(),
        _ => fetch_frame(ctx, event).await?,
    };

    let png = render_thumbnail(&frame, &spec)?;
    let hash = thumbnail_hash(&png);
    Ok(Some((png, hash)))
}

fn rect(c: &eventdb::Crop) -> cutting::Rect {
    cutting::Rect {
        x: c.x,
        y: c.y,
        width: c.width,
        height: c.height,
    }
}

async fn fetch_frame(ctx: &Arc<CutterCtx>, event: &Event) -> Result<Vec<u8>, ThumbError> {
    let (Some(channel), Some(quality)) = (
        event.video_channel.as_deref(),
        event.video_quality.as_deref(),
    ) else {
        return Err(ThumbError::Incomplete {
            mode: event.thumbnail_mode,
            missing: "channel/quality",
        });
    };
    let time = event.thumbnail_time.ok_or(ThumbError::Incomplete {
        mode: event.thumbnail_mode,
        missing: "thumbnail time",
    })?;

    let mut url = ctx
        .restreamer_url
        .join(&format!("frame/{channel}/{quality}"))
        .map_err(|e| ThumbError::Frame(e.to_string()))?;
    url.query_pairs_mut().append_pair(
        "timestamp",
        &time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    );

    let response = ctx
        .client
        .get(url)
        .send()
        .await
        .map_err(|e| ThumbError::Frame(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ThumbError::Frame(format!(
            "frame endpoint returned {}",
            response.status()
        )));
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| ThumbError::Frame(e.to_string()))
}
