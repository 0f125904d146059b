//! Directory listings over the archive.
//!
//! Listings are the unit peers exchange: hours of a (channel, quality),
//! then segment filenames within an hour. Missing directories list as
//! empty so a node that has never seen a channel still answers cleanly.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SegmentError;
use crate::path::{SegmentFile, parse_hour};

/// Join base/channel/quality/hour safely.
pub fn hour_dir(base: &Path, channel: &str, quality: &str, hour: &str) -> PathBuf {
    base.join(channel).join(quality).join(hour)
}

/// List quality directories under a channel, sorted.
pub async fn list_qualities(base: &Path, channel: &str) -> Result<Vec<String>, SegmentError> {
    list_dir_names(&base.join(channel), |_| true).await
}

/// List hour buckets for a (channel, quality), sorted ascending.
///
/// Only names matching the hour grammar are returned; stray directories
/// are ignored.
pub async fn list_hours(
    base: &Path,
    channel: &str,
    quality: &str,
) -> Result<Vec<String>, SegmentError> {
    list_dir_names(&base.join(channel).join(quality), |name| {
        parse_hour(name).is_ok()
    })
    .await
}

/// List parsed segments in one hour bucket, in deterministic order.
///
/// Entries that do not parse (temp files, stray data) are skipped.
pub async fn list_segments(
    base: &Path,
    channel: &str,
    quality: &str,
    hour: &str,
) -> Result<Vec<SegmentFile>, SegmentError> {
    let dir = hour_dir(base, channel, quality, hour);
    let names = list_dir_names(&dir, |_| true).await?;

    let mut segments = Vec::with_capacity(names.len());
    for name in names {
        match SegmentFile::parse(channel, quality, hour, &name) {
            Ok(segment) => segments.push(segment),
            Err(_) => debug!(%name, hour, "Skipping non-segment entry"),
        }
    }
    segments.sort();
    Ok(segments)
}

/// List segments across a contiguous span of hours, in order.
pub async fn list_segments_in_hours(
    base: &Path,
    channel: &str,
    quality: &str,
    hours: &[String],
) -> Result<Vec<SegmentFile>, SegmentError> {
    let mut all = Vec::new();
    for hour in hours {
        all.extend(list_segments(base, channel, quality, hour).await?);
    }
    all.sort();
    Ok(all)
}

async fn list_dir_names(
    dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<String>, SegmentError> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SegmentError::io("listing directory", dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| SegmentError::io("listing directory", dir, e))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || !keep(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::SegmentKind;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    async fn put(base: &Path, seg: &SegmentFile, bytes: &[u8]) {
        let path = base.join(seg.rel_path());
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(path, bytes).await.unwrap();
    }

    fn seg(hour_offset_min: i64, hash: &str) -> SegmentFile {
        SegmentFile {
            channel: "alpha".into(),
            quality: "source".into(),
            start: Utc.with_ymd_and_hms(2024, 11, 9, 0, 0, 0).unwrap()
                + chrono::Duration::minutes(hour_offset_min),
            duration: Duration::from_secs(2),
            kind: SegmentKind::Full,
            hash: hash.into(),
        }
    }

    #[tokio::test]
    async fn missing_directories_list_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(
            list_hours(tmp.path(), "nope", "source")
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            list_segments(tmp.path(), "nope", "source", "2024-11-09T00")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn listings_are_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path();

        put(base, &seg(70, "BBB"), b"b").await; // lands in hour 01
        put(base, &seg(1, "AAA"), b"a").await;
        put(base, &seg(0, "AAA"), b"c").await;

        // Stray files are skipped.
        tokio::fs::write(
            base.join("alpha/source/2024-11-09T00/.tmp-x.part"),
            b"partial",
        )
        .await
        .unwrap();
        tokio::fs::write(base.join("alpha/source/2024-11-09T00/notes.txt"), b"x")
            .await
            .unwrap();

        let hours = list_hours(base, "alpha", "source").await.unwrap();
        assert_eq!(hours, vec!["2024-11-09T00", "2024-11-09T01"]);

        let segments = list_segments(base, "alpha", "source", "2024-11-09T00")
            .await
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].start < segments[1].start);

        let all = list_segments_in_hours(base, "alpha", "source", &hours)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }
}
