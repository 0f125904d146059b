//! Archive listing and raw segment endpoints: the peer protocol.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use super::clean_component;
use crate::AppState;
use crate::error::ApiError;
use segments::SegmentFile;

pub async fn qualities(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let channel = clean_component(&channel, "channel")?;
    Ok(Json(
        segments::list::list_qualities(&state.base_dir, channel).await?,
    ))
}

pub async fn hours(
    State(state): State<AppState>,
    Path((channel, quality)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let channel = clean_component(&channel, "channel")?;
    let quality = clean_component(&quality, "quality")?;
    Ok(Json(
        segments::list::list_hours(&state.base_dir, channel, quality).await?,
    ))
}

pub async fn segments(
    State(state): State<AppState>,
    Path((channel, quality, hour)): Path<(String, String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let channel = clean_component(&channel, "channel")?;
    let quality = clean_component(&quality, "quality")?;
    let hour = clean_component(&hour, "hour")?;
    let listed = segments::list::list_segments(&state.base_dir, channel, quality, hour).await?;
    Ok(Json(listed.iter().map(SegmentFile::file_name).collect()))
}

pub async fn segment_bytes(
    State(state): State<AppState>,
    Path((channel, quality, hour, filename)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let channel = clean_component(&channel, "channel")?;
    let quality = clean_component(&quality, "quality")?;
    let hour = clean_component(&hour, "hour")?;
    let filename = clean_component(&filename, "segment filename")?;

    // Parsing validates the name; anything else in the directory is not
    // served.
    SegmentFile::parse(channel, quality, hour, filename)
        .map_err(|_| ApiError::NotFound)?;

    let path = state
        .base_dir
        .join(channel)
        .join(quality)
        .join(hour)
        .join(filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(segments::SegmentError::io("opening segment", &path, e).into()),
    };

    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, "video/mp2t")], body).into_response())
}
