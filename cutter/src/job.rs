//! Executing one claimed job.
//!
//! The cut streams from the local restreamer straight into the upload
//! backend; nothing is buffered whole. Failure handling follows the
//! state machine: retryable failures release the claim back to EDITED,
//! bad requests fail to UNEDITED with `error` set, and anything after
//! `begin_finalizing` that does not conclude cleanly leaves the row in
//! FINALIZING for an operator.

use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use cutting::{CutType, Transition, TransitionKind, validate_cut};
use eventdb::Event;
use uploads::{UploadError, VideoMeta};

use crate::CutterCtx;
use crate::thumbs;

#[derive(Debug, Error)]
pub enum JobError {
    /// The claim goes back to EDITED for any cutter to retry.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Needs an operator; the row goes to UNEDITED with `error` set.
    #[error("{0}")]
    Fatal(String),
}

impl From<UploadError> for JobError {
    fn from(e: UploadError) -> Self {
        if e.is_retryable() {
            JobError::Retryable(e.to_string())
        } else {
            JobError::Fatal(e.to_string())
        }
    }
}

/// How a job concluded when no error was raised.
pub enum JobOutcome {
    Committed,
    /// Commit failed with an unknown result; the row stays in
    /// FINALIZING for an operator.
    AmbiguousCommit,
}

/// Run a job already claimed by this cutter and settle the row's state.
pub async fn run_job(ctx: &Arc<CutterCtx>, event: Event) {
    let id = event.id.clone();
    match cut_and_upload(ctx, &event).await {
        Ok(JobOutcome::Committed) => {
            ctx.metrics.inc("jobs_total", &[("outcome", "ok")]);
        }
        Ok(JobOutcome::AmbiguousCommit) => {
            ctx.metrics.inc("jobs_total", &[("outcome", "ambiguous")]);
        }
        Err(JobError::Retryable(reason)) => {
            warn!(%id, reason, "Job failed, releasing claim for retry");
            ctx.metrics.inc("jobs_total", &[("outcome", "retryable")]);
            if let Err(e) = ctx.store.release_claim(&id).await {
                error!(%id, error = %e, "Could not release claim");
            }
        }
        Err(JobError::Fatal(reason)) => {
            warn!(%id, reason, "Job failed permanently");
            ctx.metrics.inc("jobs_total", &[("outcome", "fatal")]);
            if let Err(e) = ctx.store.fail_to_unedited(&id, &reason).await {
                error!(%id, error = %e, "Could not record job failure");
            }
        }
    }
}

/// Everything the edit inputs must provide before a cut can start.
pub struct CutInputs {
    pub channel: String,
    pub quality: String,
    pub ranges: Vec<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>,
    pub transitions: Vec<Option<Transition>>,
    pub crop: Option<cutting::Rect>,
    pub title: String,
}

/// Validate a row's edit inputs. Everything wrong here is operator
/// error, never retried.
pub fn parse_inputs(event: &Event, cut_type: CutType) -> Result<CutInputs, JobError> {
    let channel = event
        .video_channel
        .clone()
        .ok_or_else(|| JobError::Fatal("event has no channel".into()))?;
    let quality = event
        .video_quality
        .clone()
        .ok_or_else(|| JobError::Fatal("event has no quality".into()))?;
    let title = event
        .video_title
        .clone()
        .ok_or_else(|| JobError::Fatal("event has no title".into()))?;

    let ranges: Vec<_> = event
        .video_ranges
        .as_ref()
        .map(|r| r.0.iter().map(|r| (r.start, r.end)).collect())
        .unwrap_or_default();

    let transitions = event
        .video_transitions
        .as_ref()
        .map(|list| {
            list.0
                .iter()
                .map(|t| {
                    t.as_ref()
                        .map(|t| {
                            Ok(Transition {
                                kind: TransitionKind::parse(&t.kind)
                                    .map_err(|e| JobError::Fatal(e.to_string()))?,
                                duration: t.duration,
                            })
                        })
                        .transpose()
                })
                .collect::<Result<Vec<_>, JobError>>()
        })
        .transpose()?
        .unwrap_or_else(|| vec![None; ranges.len().saturating_sub(1)]);

    let crop = event.video_crop.as_ref().map(|c| cutting::Rect {
        x: c.0.x,
        y: c.0.y,
        width: c.0.width,
        height: c.0.height,
    });

    validate_cut(&ranges, &transitions, cut_type, crop)
        .map_err(|e| JobError::Fatal(e.to_string()))?;

    Ok(CutInputs {
        channel,
        quality,
        ranges,
        transitions,
        crop,
        title,
    })
}

/// Build the local restreamer cut URL for a job.
pub fn cut_url(
    base: &url::Url,
    inputs: &CutInputs,
    cut_type: CutType,
    allow_holes: bool,
) -> Result<url::Url, JobError> {
    let mut url = base
        .join(&format!("cut/{}/{}", inputs.channel, inputs.quality))
        .map_err(|e| JobError::Fatal(format!("bad restreamer URL: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        for (start, end) in &inputs.ranges {
            query.append_pair(
                "range",
                &format!(
                    "{},{}",
                    start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    end.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                ),
            );
        }
        for transition in &inputs.transitions {
            match transition {
                None => query.append_pair("transition", ""),
                Some(t) => query.append_pair(
                    "transition",
                    &format!("{},{}", t.kind.filter_name(), t.duration),
                ),
            };
        }
        if let Some(rect) = inputs.crop {
            query.append_pair(
                "crop",
                &format!("{},{},{},{}", rect.x, rect.y, rect.width, rect.height),
            );
        }
        query.append_pair("type", cut_type.as_str());
        query.append_pair("allow_holes", if allow_holes { "true" } else { "false" });
    }
    Ok(url)
}

async fn cut_and_upload(ctx: &Arc<CutterCtx>, event: &Event) -> Result<JobOutcome, JobError> {
    let location_name = event
        .upload_location
        .as_deref()
        .ok_or_else(|| JobError::Fatal("event has no upload location".into()))?;
    let location = ctx
        .locations
        .get(location_name)
        .ok_or_else(|| JobError::Fatal(format!("unknown upload location {location_name:?}")))?
        .clone();

    let inputs = parse_inputs(event, location.cut_type)?;
    let url = cut_url(
        &ctx.restreamer_url,
        &inputs,
        location.cut_type,
        event.allow_holes,
    )?;

    info!(id = %event.id, %url, "Requesting cut");
    let response = ctx
        .client
        .get(url)
        .send()
        .await
        .map_err(|e| JobError::Retryable(format!("restreamer unreachable: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // 4xx from the restreamer means the request itself is bad.
        return if status.is_client_error() {
            Err(JobError::Fatal(format!("cut rejected: {body}")))
        } else {
            Err(JobError::Retryable(format!("cut failed ({status}): {body}")))
        };
    }

    let meta = VideoMeta {
        title: inputs.title.clone(),
        description: event.video_description.clone().unwrap_or_default(),
        tags: event
            .video_tags
            .as_ref()
            .map(|t| t.0.clone())
            .unwrap_or_default(),
        public: event.public,
        container: match location.cut_type {
            CutType::Webm => "webm".to_string(),
            _ => "ts".to_string(),
        },
    };

    let mut session = location.backend.begin(&meta).await.map_err(JobError::from)?;

    // Stream cut bytes into the backend. Until begin_finalizing the row
    // is safely CLAIMED; abandoned bytes cost nothing.
    let mut stream = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            _ = ctx.token.cancelled() => {
                session.abandon().await;
                return Err(JobError::Retryable("shut down mid-cut".into()));
            }
            next = stream.next() => next,
        };
        match chunk {
            Some(Ok(chunk)) => {
                if let Err(e) = session.upload_chunk(chunk).await {
                    session.abandon().await;
                    return Err(e.into());
                }
            }
            Some(Err(e)) => {
                session.abandon().await;
                return Err(JobError::Retryable(format!("cut stream broke: {e}")));
            }
            None => break,
        }
    }

    // Point of no return: enter FINALIZING before asking the backend to
    // commit. Commit is at-most-once.
    if !ctx
        .store
        .begin_finalizing(&event.id)
        .await
        .map_err(|e| JobError::Retryable(e.to_string()))?
    {
        session.abandon().await;
        return Err(JobError::Fatal(
            "row left CLAIMED before finalize; operator intervened".into(),
        ));
    }

    let committed = match session.commit().await {
        Ok(committed) => committed,
        Err(e) => {
            // The commit outcome is ambiguous: the row stays in
            // FINALIZING and an operator decides. Never auto-retry.
            error!(id = %event.id, error = %e, "Commit failed; row left in FINALIZING");
            ctx.metrics.inc("finalizing_stuck_total", &[]);
            return Ok(JobOutcome::AmbiguousCommit);
        }
    };

    let recorded = ctx
        .store
        .record_commit(
            &event.id,
            &committed.video_id,
            &committed.video_link,
            committed.playable,
        )
        .await
        .map_err(|e| JobError::Retryable(e.to_string()))?;
    if !recorded {
        warn!(id = %event.id, "Commit recorded but row was not in FINALIZING");
    }
    info!(
        id = %event.id,
        video_id = %committed.video_id,
        link = %committed.video_link,
        "Upload committed"
    );

    // Thumbnail upload is best-effort after commit; failures are
    // reported on the row without disturbing the published video state.
    match thumbs::render_for_event(ctx, event).await {
        Ok(Some((png, hash))) => {
            if let Err(e) = location.backend.set_thumbnail(&committed.video_id, &png).await {
                warn!(id = %event.id, error = %e, "Thumbnail upload failed");
            } else if let Err(e) = ctx.store.set_thumbnail_written(&event.id, &hash).await {
                warn!(id = %event.id, error = %e, "Could not record thumbnail hash");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(id = %event.id, error = %e, "Thumbnail rendering failed"),
    }

    Ok(JobOutcome::Committed)
}
