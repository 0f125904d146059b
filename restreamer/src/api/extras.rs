//! Opaque auxiliary directories (chat logs, emotes, downloaded media).
//!
//! Flat name listing plus raw fetch; content-hashed filenames make the
//! mirror protocol idempotent without any segment semantics.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use super::clean_component;
use crate::AppState;
use crate::error::ApiError;

pub async fn list(
    State(state): State<AppState>,
    Path(dir): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let dir = clean_component(&dir, "directory")?;
    let path = state.base_dir.join(dir);

    let mut read_dir = match tokio::fs::read_dir(&path).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Json(Vec::new())),
        Err(e) => return Err(segments::SegmentError::io("listing directory", &path, e).into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| segments::SegmentError::io("listing directory", &path, e))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            names.push(name);
        }
    }
    names.sort();
    Ok(Json(names))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path((dir, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let dir = clean_component(&dir, "directory")?;
    let filename = clean_component(&filename, "filename")?;
    let path = state.base_dir.join(dir).join(filename);

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(segments::SegmentError::io("opening file", &path, e).into()),
    };
    Ok(Body::from_stream(ReaderStream::new(file)).into_response())
}
