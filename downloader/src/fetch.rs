//! Individual segment downloads.
//!
//! A segment is fetched into memory (they are a few seconds of MPEG-TS),
//! its real duration is probed from the container, and the bytes go
//! through the atomic writer. Classification:
//! `partial` when the body was truncated or retries ran out with some
//! bytes in hand; `suspect` when the playlist flagged a discontinuity,
//! this is the first segment after a worker (re)start, or the probed
//! duration disagrees with the advertised one; `full` otherwise.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use common::retry::{AttemptOutcome, Backoff, RetryError, with_backoff};
use segments::{SegmentFile, SegmentKind, SegmentWriter, mpegts};

use crate::provider::{ProviderError, Upstream};

/// Probed duration may differ from the advertised one by this much
/// before the segment is tagged suspect.
const DURATION_EPSILON: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Segment(#[from] segments::SegmentError),

    #[error("download cancelled")]
    Cancelled,

    #[error("no bytes received for segment")]
    Empty,
}

/// One segment to download.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub url: Url,
    pub start: DateTime<Utc>,
    pub advertised_duration: f64,
    /// Upstream discontinuity or worker restart: archive as suspect
    /// even if the bytes themselves look fine.
    pub suspect_hint: bool,
}

/// Download and archive one segment.
///
/// Transient failures retry on the segment-fetch schedule. A truncated
/// body is not retried: the bytes are a valid prefix and are archived
/// as `partial`. A failure with nothing received is abandoned.
pub async fn download_segment(
    upstream: &Arc<Upstream>,
    base_dir: &Path,
    channel: &str,
    quality: &str,
    job: &SegmentJob,
    token: &CancellationToken,
) -> Result<SegmentFile, FetchError> {
    let result = with_backoff(Backoff::segment_fetch(), token, || async {
        match fetch_bytes(upstream, &job.url, token).await {
            Ok(FetchedBody::Complete(bytes)) => AttemptOutcome::Done((bytes, false)),
            // A truncated body is not retried: the playlist will not
            // serve these bytes again, and a prefix is still useful.
            Ok(FetchedBody::Truncated(bytes)) => AttemptOutcome::Done((bytes, true)),
            Err(e) if e.is_auth_failure() => {
                // Refresh and retry; a failed refresh falls through to
                // the normal schedule.
                upstream.refresh_token(channel).await;
                AttemptOutcome::Transient(e)
            }
            Err(e) if e.is_retryable() => AttemptOutcome::Transient(e),
            Err(e) => AttemptOutcome::Permanent(e),
        }
    })
    .await;

    let (bytes, truncated) = match result {
        Ok(ok) => ok,
        Err(RetryError::Cancelled) => return Err(FetchError::Cancelled),
        Err(RetryError::Inner(e)) => return Err(e.into()),
    };
    // A cancelled download must leave nothing in the archive.
    if token.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    if bytes.is_empty() {
        return Err(FetchError::Empty);
    }

    let (duration, kind) = classify(&bytes, job, truncated);

    let mut writer = SegmentWriter::create(base_dir, channel, quality, job.start).await?;
    writer.write_chunk(&bytes).await?;
    let segment = writer
        .finalize(Duration::from_secs_f64(duration), kind)
        .await?;
    debug!(
        name = %segment.file_name(),
        kind = %segment.kind,
        "Archived segment"
    );
    Ok(segment)
}

/// Decide the archived duration and type tag.
fn classify(bytes: &[u8], job: &SegmentJob, truncated: bool) -> (f64, SegmentKind) {
    let probed = mpegts::probe_duration(bytes);
    let duration = probed.unwrap_or(job.advertised_duration);

    if truncated {
        return (duration, SegmentKind::Partial);
    }
    if job.suspect_hint {
        return (duration, SegmentKind::Suspect);
    }
    match probed {
        Some(probed) if (probed - job.advertised_duration).abs() > DURATION_EPSILON => {
            warn!(
                advertised = job.advertised_duration,
                probed, "Segment duration disagrees with playlist"
            );
            (probed, SegmentKind::Suspect)
        }
        // Unprobeable bytes mean the container is odd; be honest about it.
        None => (duration, SegmentKind::Suspect),
        Some(_) => (duration, SegmentKind::Full),
    }
}

enum FetchedBody {
    Complete(Bytes),
    /// The connection closed early or the body came up short.
    Truncated(Bytes),
}

async fn fetch_bytes(
    upstream: &Arc<Upstream>,
    url: &Url,
    token: &CancellationToken,
) -> Result<FetchedBody, ProviderError> {
    use futures::StreamExt;

    let response = upstream
        .client()
        .get(url.clone())
        .timeout(Duration::from_secs(60))
        .send()
        .await
        .map_err(|source| ProviderError::Fetch {
            url: url.clone(),
            source,
        })?;
    if !response.status().is_success() {
        return Err(ProviderError::Status {
            url: url.clone(),
            status: response.status(),
        });
    }

    let content_length = response.content_length();
    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => {
                // Treat cancellation as truncation; the caller maps the
                // cancelled token to a clean abort before writing.
                return Ok(FetchedBody::Truncated(body.freeze()));
            }
            next = stream.next() => next,
        };
        match chunk {
            Some(Ok(chunk)) => body.extend_from_slice(&chunk),
            Some(Err(source)) => {
                // Mid-body failure: keep the prefix.
                debug!(url = %url, error = %source, "Body truncated mid-stream");
                return Ok(FetchedBody::Truncated(body.freeze()));
            }
            None => break,
        }
    }

    if let Some(expected) = content_length
        && (body.len() as u64) < expected
    {
        return Ok(FetchedBody::Truncated(body.freeze()));
    }
    Ok(FetchedBody::Complete(body.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(advertised: f64, suspect_hint: bool) -> SegmentJob {
        SegmentJob {
            url: Url::parse("http://upstream.test/seg0.ts").unwrap(),
            start: Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 0).unwrap(),
            advertised_duration: advertised,
            suspect_hint,
        }
    }

    /// Synthesize a TS stream with 25 fps video PTS spanning `secs`.
    fn ts_bytes(secs: f64) -> Vec<u8> {
        let frames = (secs * 25.0) as u64;
        let mut out = Vec::new();
        for i in 0..frames {
            let pts = 900_000 + i * 3600;
            let mut packet = vec![0xFFu8; 188];
            packet[0] = 0x47;
            packet[1] = 0x40;
            packet[2] = 0x00;
            packet[3] = 0x10;
            packet[4..7].copy_from_slice(&[0x00, 0x00, 0x01]);
            packet[7] = 0xE0;
            packet[8] = 0x00;
            packet[9] = 0x00;
            packet[10] = 0x80;
            packet[11] = 0x80;
            packet[12] = 5;
            packet[13] = 0x20 | (((pts >> 30) & 0x07) as u8) << 1 | 0x01;
            packet[14] = ((pts >> 22) & 0xFF) as u8;
            packet[15] = (((pts >> 15) & 0x7F) as u8) << 1 | 0x01;
            packet[16] = ((pts >> 7) & 0xFF) as u8;
            packet[17] = ((pts & 0x7F) as u8) << 1 | 0x01;
            out.extend(packet);
        }
        out
    }

    #[test]
    fn clean_matching_segment_is_full() {
        let bytes = ts_bytes(2.0);
        let (duration, kind) = classify(&bytes, &job(2.0, false), false);
        assert_eq!(kind, SegmentKind::Full);
        assert!((duration - 2.0).abs() < 0.1);
    }

    #[test]
    fn truncated_body_is_partial() {
        let bytes = ts_bytes(1.0);
        let (_, kind) = classify(&bytes, &job(2.0, false), true);
        assert_eq!(kind, SegmentKind::Partial);
    }

    #[test]
    fn discontinuity_hint_is_suspect() {
        let bytes = ts_bytes(2.0);
        let (_, kind) = classify(&bytes, &job(2.0, true), false);
        assert_eq!(kind, SegmentKind::Suspect);
    }

    #[test]
    fn duration_disagreement_is_suspect() {
        let bytes = ts_bytes(2.0);
        let (duration, kind) = classify(&bytes, &job(4.0, false), false);
        assert_eq!(kind, SegmentKind::Suspect);
        // The probed duration wins over the advertised lie.
        assert!((duration - 2.0).abs() < 0.1);
    }

    #[test]
    fn unprobeable_bytes_are_suspect_with_advertised_duration() {
        let (duration, kind) = classify(b"not mpeg ts at all", &job(2.0, false), false);
        assert_eq!(kind, SegmentKind::Suspect);
        assert_eq!(duration, 2.0);
    }
}
