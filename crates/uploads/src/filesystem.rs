//! Filesystem upload backend.
//!
//! The reference destination: bytes stream into `.incoming/`, commit
//! atomically renames into the destination directory and writes a JSON
//! metadata sidecar. Always immediately playable. Single-node
//! deployments and the test suite use this backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::RngExt;
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::{CommittedUpload, UploadBackend, UploadError, UploadSession, UploadStatus, VideoMeta};

pub struct FilesystemBackend {
    root: PathBuf,
    link_prefix: Option<String>,
}

#[derive(Serialize)]
struct Sidecar<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    public: bool,
    uploaded_at: String,
}

impl FilesystemBackend {
    pub fn new(root: PathBuf, link_prefix: Option<String>) -> Self {
        Self { root, link_prefix }
    }

    fn incoming_dir(&self) -> PathBuf {
        self.root.join(".incoming")
    }

    /// Locate a committed video by id, whatever its container.
    async fn find_video(&self, video_id: &str) -> Result<PathBuf, UploadError> {
        let mut read_dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| UploadError::io("listing", &self.root, e))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| UploadError::io("listing", &self.root, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.rsplit_once('.').map(|(stem, _)| stem)
                && stem == video_id
                && !name.ends_with(".json")
                && !name.ends_with(".png")
            {
                return Ok(entry.path());
            }
        }
        Err(UploadError::UnknownVideo(video_id.to_string()))
    }

    async fn write_sidecar(&self, video_id: &str, meta: &VideoMeta) -> Result<(), UploadError> {
        let sidecar = Sidecar {
            title: &meta.title,
            description: &meta.description,
            tags: &meta.tags,
            public: meta.public,
            uploaded_at: Utc::now().to_rfc3339(),
        };
        let path = self.root.join(format!("{video_id}.json"));
        let json = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| UploadError::io("encoding sidecar for", &path, std::io::Error::other(e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| UploadError::io("writing sidecar", &path, e))
    }
}

#[async_trait]
impl UploadBackend for FilesystemBackend {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    fn supports_metadata_edit(&self) -> bool {
        true
    }

    async fn begin(&self, meta: &VideoMeta) -> Result<Box<dyn UploadSession>, UploadError> {
        let incoming = self.incoming_dir();
        tokio::fs::create_dir_all(&incoming)
            .await
            .map_err(|e| UploadError::io("creating", &incoming, e))?;

        let token: u64 = rand::rng().random();
        let video_id = format!("{}-{token:08x}", slugify(&meta.title));
        let temp_path = incoming.join(format!("{video_id}.part"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| UploadError::io("creating upload", &temp_path, e))?;

        Ok(Box::new(FilesystemSession {
            backend_root: self.root.clone(),
            link_prefix: self.link_prefix.clone(),
            video_id,
            temp_path,
            file: Some(file),
            container: meta.container.clone(),
            meta: meta.clone(),
        }))
    }

    async fn query_status(&self, video_id: &str) -> Result<UploadStatus, UploadError> {
        self.find_video(video_id).await?;
        Ok(UploadStatus::Done)
    }

    async fn modify_metadata(&self, video_id: &str, meta: &VideoMeta) -> Result<(), UploadError> {
        self.find_video(video_id).await?;
        self.write_sidecar(video_id, meta).await
    }

    async fn set_thumbnail(&self, video_id: &str, png: &[u8]) -> Result<(), UploadError> {
        self.find_video(video_id).await?;
        let path = self.root.join(format!("{video_id}.png"));
        tokio::fs::write(&path, png)
            .await
            .map_err(|e| UploadError::io("writing thumbnail", &path, e))
    }
}

struct FilesystemSession {
    backend_root: PathBuf,
    link_prefix: Option<String>,
    video_id: String,
    temp_path: PathBuf,
    file: Option<File>,
    container: String,
    meta: VideoMeta,
}

#[async_trait]
impl UploadSession for FilesystemSession {
    async fn upload_chunk(&mut self, chunk: Bytes) -> Result<(), UploadError> {
        let file = self.file.as_mut().ok_or_else(|| {
            UploadError::io(
                "writing upload",
                &self.temp_path,
                std::io::Error::other("session already finished"),
            )
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| UploadError::io("writing upload", &self.temp_path, e))
    }

    async fn commit(mut self: Box<Self>) -> Result<CommittedUpload, UploadError> {
        let file = self.file.take().ok_or_else(|| {
            UploadError::io(
                "committing upload",
                &self.temp_path,
                std::io::Error::other("session already finished"),
            )
        })?;
        file.sync_all()
            .await
            .map_err(|e| UploadError::io("syncing upload", &self.temp_path, e))?;
        drop(file);

        let file_name = format!("{}.{}", self.video_id, self.container);
        let final_path = self.backend_root.join(&file_name);
        tokio::fs::rename(&self.temp_path, &final_path)
            .await
            .map_err(|e| UploadError::io("renaming upload into place", &final_path, e))?;

        let backend = FilesystemBackend::new(self.backend_root.clone(), self.link_prefix.clone());
        backend.write_sidecar(&self.video_id, &self.meta).await?;

        let video_link = match &self.link_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file_name),
            None => format!("file://{}", final_path.display()),
        };
        info!(video_id = %self.video_id, "Committed upload");

        Ok(CommittedUpload {
            video_id: self.video_id,
            video_link,
            playable: true,
        })
    }

    async fn abandon(mut self: Box<Self>) {
        self.file.take();
        let _ = tokio::fs::remove_file(&self.temp_path).await;
    }
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.chars().take(48).collect()
    }
}
