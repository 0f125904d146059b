//! Frame and waveform endpoints.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::{clean_component, load_segments, parse_timestamp, strip_ext};
use crate::AppState;
use crate::error::ApiError;
use cutting::SourceSegment;
use segments::select::select_segments;

#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    timestamp: String,
}

pub async fn frame(
    State(state): State<AppState>,
    Path((channel, quality)): Path<(String, String)>,
    Query(query): Query<FrameQuery>,
) -> Result<Response, ApiError> {
    let channel = clean_component(&channel, "channel")?.to_string();
    let quality = clean_component(strip_ext(&quality, ".png"), "quality")?.to_string();
    let timestamp = parse_timestamp(&query.timestamp, "timestamp")?;

    let available = load_segments(&state, &channel, &quality, timestamp, timestamp).await?;
    let covering: Vec<_> = available
        .iter()
        .filter(|s| s.start <= timestamp && s.end() > timestamp)
        .collect();
    let best = covering
        .iter()
        .min_by(|a, b| {
            a.kind
                .rank()
                .cmp(&b.kind.rank())
                .then(a.hash.cmp(&b.hash))
        })
        .ok_or(ApiError::NotFound)?;

    let offset = (timestamp - best.start).num_milliseconds() as f64 / 1000.0;
    let png = cutting::frame::extract_frame(
        vec![SourceSegment {
            path: state.base_dir.join(best.rel_path()),
            duration: best.duration.as_secs_f64(),
        }],
        offset,
        state.token.child_token(),
    )
    .await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Debug, Deserialize)]
pub struct WaveformQuery {
    start: String,
    end: String,
    /// `WIDTHxHEIGHT`, e.g. `1024x128`.
    size: Option<String>,
}

const MAX_WAVEFORM_DIM: u32 = 4096;

pub async fn waveform(
    State(state): State<AppState>,
    Path((channel, quality)): Path<(String, String)>,
    Query(query): Query<WaveformQuery>,
) -> Result<Response, ApiError> {
    let channel = clean_component(&channel, "channel")?.to_string();
    let quality = clean_component(strip_ext(&quality, ".png"), "quality")?.to_string();
    let start = parse_timestamp(&query.start, "start")?;
    let end = parse_timestamp(&query.end, "end")?;
    if end <= start {
        return Err(ApiError::BadRequest("end must be after start".to_string()));
    }

    let (width, height) = parse_size(query.size.as_deref().unwrap_or("1024x128"))?;

    let available = load_segments(&state, &channel, &quality, start, end).await?;
    let selection = select_segments(&available, start, end);
    if selection.segments.is_empty() {
        return Err(ApiError::NotFound);
    }

    let sources = selection
        .segments
        .iter()
        .map(|s| SourceSegment {
            path: state.base_dir.join(s.rel_path()),
            duration: s.duration.as_secs_f64(),
        })
        .collect();
    let png =
        cutting::waveform::render_waveform(sources, width, height, state.token.child_token())
            .await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

fn parse_size(value: &str) -> Result<(u32, u32), ApiError> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| ApiError::BadRequest(format!("size {value:?} is not WIDTHxHEIGHT")))?;
    let width: u32 = w
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("bad width {w:?}")))?;
    let height: u32 = h
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("bad height {h:?}")))?;
    if width == 0 || height == 0 || width > MAX_WAVEFORM_DIM || height > MAX_WAVEFORM_DIM {
        return Err(ApiError::BadRequest(format!(
            "size {value:?} out of bounds"
        )));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size("1024x128").unwrap(), (1024, 128));
        assert!(parse_size("1024").is_err());
        assert!(parse_size("0x5").is_err());
        assert!(parse_size("9999999x5").is_err());
    }
}
