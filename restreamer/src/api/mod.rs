//! Route wiring and request parsing shared by the handlers.

pub mod cut;
pub mod extras;
pub mod listings;
pub mod media;
pub mod playlist;

use axum::Router;
use axum::routing::get;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::error::ApiError;
use segments::path::format_hour;
use segments::{SegmentFile, parse_hour};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/files/{channel}", get(listings::qualities))
        .route("/files/{channel}/{quality}", get(listings::hours))
        .route("/files/{channel}/{quality}/{hour}", get(listings::segments))
        .route(
            "/segments/{channel}/{quality}/{hour}/{filename}",
            get(listings::segment_bytes),
        )
        .route("/extras/{dir}", get(extras::list))
        .route("/extras/{dir}/{filename}", get(extras::fetch))
        .route("/playlist/{channel}", get(playlist::serve))
        .route("/cut/{channel}/{quality}", get(cut::serve))
        .route("/frame/{channel}/{quality}", get(media::frame))
        .route("/waveform/{channel}/{quality}", get(media::waveform))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject path components that could escape the archive.
pub fn clean_component<'a>(value: &'a str, what: &str) -> Result<&'a str, ApiError> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
    {
        return Err(ApiError::BadRequest(format!("invalid {what} {value:?}")));
    }
    Ok(value)
}

/// Strip a known extension suffix from a path segment, e.g.
/// `source.ts` -> `source`. The extension is advisory; the handler
/// decides the real content type.
pub fn strip_ext<'a>(value: &'a str, ext: &str) -> &'a str {
    value.strip_suffix(ext).unwrap_or(value)
}

/// Parse a wall-clock timestamp: RFC 3339, or a naive UTC datetime like
/// `2024-11-09T01:23:45.500`.
pub fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(ApiError::BadRequest(format!(
        "could not parse {what} timestamp {value:?}"
    )))
}

/// Load all segments whose coverage could intersect [start, end].
///
/// Includes the hour before `start` since a segment begun late in one
/// hour spills into the next.
pub async fn load_segments(
    state: &AppState,
    channel: &str,
    quality: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SegmentFile>, ApiError> {
    let mut hours = Vec::new();
    let mut cursor = parse_hour(&format_hour(start - ChronoDuration::hours(1)))
        .map_err(|_| ApiError::BadRequest("bad start time".to_string()))?;
    while cursor <= end {
        hours.push(format_hour(cursor));
        cursor += ChronoDuration::hours(1);
    }
    Ok(segments::list::list_segments_in_hours(&state.base_dir, channel, quality, &hours).await?)
}
