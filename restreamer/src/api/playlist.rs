//! On-the-fly HLS playlist synthesis.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::{clean_component, load_segments, parse_timestamp, strip_ext};
use crate::AppState;
use crate::error::ApiError;
use segments::select::select_segments;

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    start: Option<String>,
    end: Option<String>,
    /// Quality variant; the archive's "source" by default.
    quality: Option<String>,
}

pub async fn serve(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<PlaylistQuery>,
) -> Result<Response, ApiError> {
    let channel = clean_component(strip_ext(&channel, ".m3u8"), "channel")?.to_string();
    let quality = query.quality.as_deref().unwrap_or("source");
    let quality = clean_component(quality, "quality")?.to_string();

    // Unbounded requests cover everything the archive has.
    let (start, end) = match (&query.start, &query.end) {
        (Some(start), Some(end)) => (
            parse_timestamp(start, "start")?,
            parse_timestamp(end, "end")?,
        ),
        _ => {
            let hours = segments::list::list_hours(&state.base_dir, &channel, &quality).await?;
            let (Some(first), Some(last)) = (hours.first(), hours.last()) else {
                return Err(ApiError::NotFound);
            };
            let first = segments::parse_hour(first)
                .map_err(|_| ApiError::NotFound)?;
            let last = segments::parse_hour(last)
                .map_err(|_| ApiError::NotFound)?
                + chrono::Duration::hours(1);
            (
                query
                    .start
                    .as_deref()
                    .map(|s| parse_timestamp(s, "start"))
                    .transpose()?
                    .unwrap_or(first),
                query
                    .end
                    .as_deref()
                    .map(|s| parse_timestamp(s, "end"))
                    .transpose()?
                    .unwrap_or(last),
            )
        }
    };
    if end <= start {
        return Err(ApiError::BadRequest("end must be after start".to_string()));
    }

    let available = load_segments(&state, &channel, &quality, start, end).await?;
    let selection = select_segments(&available, start, end);

    let playlist = segments::playlist::media_playlist(&selection, |segment| {
        format!(
            "/segments/{}/{}/{}/{}",
            segment.channel,
            segment.quality,
            segment.hour(),
            segment.file_name()
        )
    });
    let body = segments::playlist::render(&playlist);

    Ok((
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response())
}
