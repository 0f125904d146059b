//! Upload backends.
//!
//! The cutter streams cut bytes into a backend session, then commits.
//! Everything after `commit` is at-most-once: the caller transitions
//! the row to `FINALIZING` before calling it and never retries it
//! automatically. Backends are polymorphic over the capability set
//! {begin, upload_chunk, commit, query_status, modify_metadata,
//! set_thumbnail}.

pub mod filesystem;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination asked us to slow down; retryable.
    #[error("upload destination rate limited the request")]
    RateLimited,

    #[error("upload destination error: {message}")]
    Backend { message: String, retryable: bool },

    #[error("backend does not support {0}")]
    NotSupported(&'static str),

    #[error("unknown video id {0:?}")]
    UnknownVideo(String),
}

impl UploadError {
    pub fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the cutter may release the claim and retry later.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::RateLimited => true,
            UploadError::Io { .. } => true,
            UploadError::Backend { retryable, .. } => *retryable,
            UploadError::NotSupported(_) | UploadError::UnknownVideo(_) => false,
        }
    }
}

/// Metadata accompanying a finished video.
#[derive(Debug, Clone, Default)]
pub struct VideoMeta {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub public: bool,
    /// Container extension of the uploaded bytes, e.g. "ts" or "webm".
    pub container: String,
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommittedUpload {
    pub video_id: String,
    pub video_link: String,
    /// True when the artifact is playable immediately; false while the
    /// destination post-processes.
    pub playable: bool,
}

/// Post-processing state of a committed video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Transcoding,
    Done,
}

/// An in-progress upload. Dropping a session without `commit` abandons
/// the bytes sent so far.
#[async_trait]
pub trait UploadSession: Send {
    async fn upload_chunk(&mut self, chunk: Bytes) -> Result<(), UploadError>;
    async fn commit(self: Box<Self>) -> Result<CommittedUpload, UploadError>;
    /// Explicitly discard the partial upload.
    async fn abandon(self: Box<Self>);
}

/// One upload destination kind.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Backend kind name, for logs and metrics.
    fn kind(&self) -> &'static str;

    /// Whether `modify_metadata`/`set_thumbnail` work after commit.
    fn supports_metadata_edit(&self) -> bool;

    async fn begin(&self, meta: &VideoMeta) -> Result<Box<dyn UploadSession>, UploadError>;

    async fn query_status(&self, video_id: &str) -> Result<UploadStatus, UploadError>;

    async fn modify_metadata(&self, video_id: &str, meta: &VideoMeta) -> Result<(), UploadError>;

    async fn set_thumbnail(&self, video_id: &str, png: &[u8]) -> Result<(), UploadError>;
}

/// Typed per-backend options: one variant per destination kind, each
/// carrying only its relevant fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Finished videos land in a directory; commit is an atomic rename.
    Filesystem {
        path: PathBuf,
        /// Prefix for the advertised video link; defaults to a file URL.
        #[serde(default)]
        link_prefix: Option<String>,
    },
}

impl BackendConfig {
    pub fn build(&self) -> Arc<dyn UploadBackend> {
        match self {
            BackendConfig::Filesystem { path, link_prefix } => Arc::new(
                filesystem::FilesystemBackend::new(path.clone(), link_prefix.clone()),
            ),
        }
    }
}
