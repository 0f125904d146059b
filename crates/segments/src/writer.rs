//! Atomic content-addressed segment writer.
//!
//! Bytes stream into a hidden temp file in the destination hour
//! directory while a SHA-256 runs incrementally. `finalize` fsyncs and
//! renames into the content-addressed name; `abort` (or drop without
//! finalize) removes the temp file. An existing file under the final
//! name has identical bytes, so a second writer simply discards its
//! temp copy.

use chrono::{DateTime, Utc};
use rand::RngExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::SegmentError;
use crate::path::{SegmentFile, SegmentKind, encode_hash, format_hour};

pub struct SegmentWriter {
    channel: String,
    quality: String,
    start: DateTime<Utc>,
    dir: PathBuf,
    temp_path: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    bytes_written: u64,
}

impl SegmentWriter {
    /// Open a temp file for a segment starting at `start`.
    pub async fn create(
        base: &Path,
        channel: &str,
        quality: &str,
        start: DateTime<Utc>,
    ) -> Result<Self, SegmentError> {
        let dir = base.join(channel).join(quality).join(format_hour(start));
        common::fs::ensure_dir_all(&dir).await?;

        let token: u64 = rand::rng().random();
        let temp_path = dir.join(format!(".tmp-{token:016x}.part"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| SegmentError::io("creating temp file", &temp_path, e))?;

        Ok(Self {
            channel: channel.to_string(),
            quality: quality.to_string(),
            start,
            dir,
            temp_path,
            file: Some(file),
            hasher: Sha256::new(),
            bytes_written: 0,
        })
    }

    /// Append a chunk, updating the running hash.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SegmentError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SegmentError::io(
                "writing temp file",
                &self.temp_path,
                std::io::Error::other("writer already finished"),
            ))?;
        file.write_all(chunk)
            .await
            .map_err(|e| SegmentError::io("writing temp file", &self.temp_path, e))?;
        self.hasher.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Fsync and rename into the final content-addressed name.
    ///
    /// Returns the resulting [`SegmentFile`]. If a file with the same
    /// name already exists its bytes are identical (same hash), so the
    /// temp copy is dropped and the existing file wins.
    pub async fn finalize(
        self,
        duration: Duration,
        kind: SegmentKind,
    ) -> Result<SegmentFile, SegmentError> {
        self.finalize_inner(duration, kind, None).await
    }

    /// Like [`finalize`](Self::finalize), but the file only becomes
    /// visible when the observed hash matches `declared_hash`; on
    /// mismatch the temp file is discarded. This is the receive-side
    /// verification for peer-to-peer replication.
    pub async fn finalize_verified(
        self,
        duration: Duration,
        kind: SegmentKind,
        declared_hash: &str,
    ) -> Result<SegmentFile, SegmentError> {
        self.finalize_inner(duration, kind, Some(declared_hash))
            .await
    }

    async fn finalize_inner(
        mut self,
        duration: Duration,
        kind: SegmentKind,
        declared_hash: Option<&str>,
    ) -> Result<SegmentFile, SegmentError> {
        let file = self.file.take().ok_or_else(|| {
            SegmentError::io(
                "finalizing temp file",
                &self.temp_path,
                std::io::Error::other("writer already finished"),
            )
        })?;
        file.sync_all()
            .await
            .map_err(|e| SegmentError::io("syncing temp file", &self.temp_path, e))?;
        drop(file);

        let hash = encode_hash(&std::mem::take(&mut self.hasher).finalize());
        if let Some(declared) = declared_hash
            && declared != hash
        {
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Err(SegmentError::HashMismatch {
                declared: declared.to_string(),
                actual: hash,
            });
        }
        let segment = SegmentFile {
            channel: self.channel.clone(),
            quality: self.quality.clone(),
            start: self.start,
            duration,
            kind,
            hash,
        };
        let final_path = self.dir.join(segment.file_name());

        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            debug!(path = %final_path.display(), "Segment already archived, dropping duplicate");
            let _ = tokio::fs::remove_file(&self.temp_path).await;
            return Ok(segment);
        }

        tokio::fs::rename(&self.temp_path, &final_path)
            .await
            .map_err(|e| SegmentError::io("renaming segment into place", &final_path, e))?;
        Ok(segment)
    }

    /// Drop the temp file without archiving anything.
    pub async fn abort(mut self) {
        self.file.take();
        let _ = tokio::fs::remove_file(&self.temp_path).await;
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        // Async cleanup is preferred via abort(); this covers panics and
        // early returns so cancelled downloads leave nothing behind.
        if self.file.is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sha2::{Digest, Sha256};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 2).unwrap()
    }

    #[tokio::test]
    async fn writes_content_addressed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::create(tmp.path(), "alpha", "source", start())
            .await
            .unwrap();
        writer.write_chunk(b"hello ").await.unwrap();
        writer.write_chunk(b"world").await.unwrap();
        let segment = writer
            .finalize(Duration::from_secs(2), SegmentKind::Full)
            .await
            .unwrap();

        assert_eq!(segment.hash, encode_hash(&Sha256::digest(b"hello world")));
        let on_disk = tokio::fs::read(tmp.path().join(segment.rel_path()))
            .await
            .unwrap();
        assert_eq!(on_disk, b"hello world");

        // No temp files left behind.
        let segments = crate::list::list_segments(tmp.path(), "alpha", "source", &segment.hour())
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_finalize_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let mut writer = SegmentWriter::create(tmp.path(), "alpha", "source", start())
                .await
                .unwrap();
            writer.write_chunk(b"same bytes").await.unwrap();
            writer
                .finalize(Duration::from_secs(2), SegmentKind::Full)
                .await
                .unwrap();
        }
        let segments = crate::list::list_segments(tmp.path(), "alpha", "source", "2024-11-09T00")
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[tokio::test]
    async fn verified_finalize_discards_on_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::create(tmp.path(), "alpha", "source", start())
            .await
            .unwrap();
        writer.write_chunk(b"tampered bytes").await.unwrap();
        let err = writer
            .finalize_verified(Duration::from_secs(2), SegmentKind::Full, "bogus-hash")
            .await
            .unwrap_err();
        assert!(matches!(err, SegmentError::HashMismatch { .. }));

        let segments = crate::list::list_segments(tmp.path(), "alpha", "source", "2024-11-09T00")
            .await
            .unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn verified_finalize_accepts_matching_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let declared = encode_hash(&Sha256::digest(b"good bytes"));
        let mut writer = SegmentWriter::create(tmp.path(), "alpha", "source", start())
            .await
            .unwrap();
        writer.write_chunk(b"good bytes").await.unwrap();
        let segment = writer
            .finalize_verified(Duration::from_secs(2), SegmentKind::Full, &declared)
            .await
            .unwrap();
        assert_eq!(segment.hash, declared);
    }

    #[tokio::test]
    async fn abort_removes_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::create(tmp.path(), "alpha", "source", start())
            .await
            .unwrap();
        writer.write_chunk(b"doomed").await.unwrap();
        writer.abort().await;

        let dir = tmp.path().join("alpha/source/2024-11-09T00");
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
