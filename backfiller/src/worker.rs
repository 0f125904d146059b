//! The diff-and-fetch loop for one (peer, channel, quality).
//!
//! Hours are walked newest-first so live replication catches up first;
//! older hours fill in on the periodic full passes. Fetches stream
//! through the atomic segment writer, which recomputes the SHA-256; a
//! mismatch against the filename's declared hash discards the file.

use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use common::Metrics;
use common::retry::Backoff;
use segments::{SegmentFile, SegmentKind, SegmentWriter, parse_hour};

use crate::peers::Peer;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer returned {status} for {url}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[error("peer sent bytes hashing to {actual}, filename declares {declared}")]
    HashMismatch { declared: String, actual: String },

    #[error(transparent)]
    Segment(#[from] segments::SegmentError),

    #[error("bad url: {0}")]
    BadUrl(String),
}

pub struct SharedConfig {
    pub base_dir: PathBuf,
    pub client: reqwest::Client,
    pub metrics: Arc<Metrics>,
    pub max_hours_ago: i64,
    pub fanout: usize,
    pub recent_interval: Duration,
    pub full_pass_every: u64,
}

pub struct BackfillWorker {
    pub shared: Arc<SharedConfig>,
    pub token: CancellationToken,
    pub peer: Peer,
    pub channel: String,
    pub quality: String,
}

impl BackfillWorker {
    pub async fn run(self) {
        let mut pass: u64 = 0;
        let mut backoff = Backoff::peer_backfill(self.shared.recent_interval);
        let mut peer_healthy = true;

        while !self.token.is_cancelled() {
            let full_pass = pass % self.shared.full_pass_every == 0;
            match self.one_pass(full_pass).await {
                Ok(fetched) => {
                    backoff.reset();
                    peer_healthy = true;
                    if fetched > 0 {
                        info!(
                            peer = %self.peer.name,
                            channel = %self.channel,
                            quality = %self.quality,
                            fetched,
                            "Backfill pass complete"
                        );
                    }
                }
                Err(e) => {
                    peer_healthy = false;
                    self.shared
                        .metrics
                        .inc("pass_failures_total", &[("peer", &self.peer.name)]);
                    warn!(peer = %self.peer.name, error = %e, "Backfill pass failed");
                }
            }
            pass += 1;

            let sleep = if peer_healthy {
                self.shared.recent_interval
            } else {
                // The peer schedule has no budget, so this always
                // yields a delay.
                backoff
                    .next_delay()
                    .unwrap_or(self.shared.recent_interval)
            };
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// One diff-and-fetch pass. Full passes walk the whole lookback
    /// window; quick passes only the most recent remote hour.
    async fn one_pass(&self, full_pass: bool) -> Result<u64, BackfillError> {
        let mut remote_hours = self
            .list_remote(&format!("files/{}/{}", self.channel, self.quality))
            .await?;

        let horizon = Utc::now() - ChronoDuration::hours(self.shared.max_hours_ago);
        remote_hours.retain(|hour| match parse_hour(hour) {
            Ok(start) => start + ChronoDuration::hours(1) > horizon,
            Err(_) => false,
        });
        // Newest first: the live tail matters most.
        remote_hours.sort();
        remote_hours.reverse();
        if !full_pass {
            remote_hours.truncate(1);
        }

        let mut fetched = 0u64;
        for hour in &remote_hours {
            if self.token.is_cancelled() {
                break;
            }
            fetched += self.backfill_hour(hour).await?;
        }
        Ok(fetched)
    }

    async fn backfill_hour(&self, hour: &str) -> Result<u64, BackfillError> {
        let remote_names = self
            .list_remote(&format!("files/{}/{}/{}", self.channel, self.quality, hour))
            .await?;

        let local: HashSet<String> =
            segments::list::list_segments(&self.shared.base_dir, &self.channel, &self.quality, hour)
                .await?
                .iter()
                .map(SegmentFile::file_name)
                .collect();

        // Content-addressed diff by full filename: same instant with a
        // different hash is a distinct file and both are kept.
        let missing: Vec<String> = remote_names
            .into_iter()
            .filter(|name| !local.contains(name))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }
        debug!(
            peer = %self.peer.name,
            hour,
            missing = missing.len(),
            "Fetching missing segments"
        );

        let fetched = futures::stream::iter(missing)
            .map(|name| self.fetch_segment(hour, name))
            .buffer_unordered(self.shared.fanout)
            .fold(0u64, |acc, result| async move {
                match result {
                    Ok(()) => acc + 1,
                    // Individual segment failures stay local to the
                    // segment; the next pass retries.
                    Err(e) => {
                        warn!(error = %e, "Segment backfill failed");
                        acc
                    }
                }
            })
            .await;
        Ok(fetched)
    }

    async fn fetch_segment(&self, hour: &str, name: String) -> Result<(), BackfillError> {
        let parsed = SegmentFile::parse(&self.channel, &self.quality, hour, &name)?;

        let url = self
            .peer
            .url
            .join(&format!(
                "segments/{}/{}/{}/{}",
                self.channel, self.quality, hour, name
            ))
            .map_err(|e| BackfillError::BadUrl(e.to_string()))?;

        let response = self
            .shared
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BackfillError::Fetch {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(BackfillError::Status {
                url,
                status: response.status(),
            });
        }

        let mut writer = SegmentWriter::create(
            &self.shared.base_dir,
            &self.channel,
            &self.quality,
            parsed.start,
        )
        .await?;

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = self.token.cancelled() => {
                    writer.abort().await;
                    return Ok(());
                }
                next = stream.next() => next,
            };
            match chunk {
                Some(Ok(chunk)) => writer.write_chunk(&chunk).await?,
                Some(Err(source)) => {
                    writer.abort().await;
                    return Err(BackfillError::Fetch { url, source });
                }
                None => break,
            }
        }

        // The file only becomes visible if the observed hash matches
        // the one the filename declares.
        match writer
            .finalize_verified(parsed.duration, parsed.kind, &parsed.hash)
            .await
        {
            Ok(_) => {}
            Err(segments::SegmentError::HashMismatch { declared, actual }) => {
                self.shared
                    .metrics
                    .inc("hash_mismatches_total", &[("peer", &self.peer.name)]);
                return Err(BackfillError::HashMismatch { declared, actual });
            }
            Err(e) => return Err(e.into()),
        }

        self.shared.metrics.inc(
            "segments_fetched_total",
            &[("peer", &self.peer.name), ("channel", &self.channel)],
        );
        Ok(())
    }

    async fn list_remote(&self, path: &str) -> Result<Vec<String>, BackfillError> {
        let url = self
            .peer
            .url
            .join(path)
            .map_err(|e| BackfillError::BadUrl(e.to_string()))?;
        let response = self
            .shared
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BackfillError::Fetch {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(BackfillError::Status {
                url,
                status: response.status(),
            });
        }
        response
            .json::<Vec<String>>()
            .await
            .map_err(|source| BackfillError::Fetch { url, source })
    }
}

/// Mirrors one opaque auxiliary directory from a peer.
pub struct ExtrasWorker {
    pub shared: Arc<SharedConfig>,
    pub token: CancellationToken,
    pub peer: Peer,
    pub dir: String,
}

impl ExtrasWorker {
    pub async fn run(self) {
        while !self.token.is_cancelled() {
            if let Err(e) = self.one_pass().await {
                warn!(peer = %self.peer.name, dir = %self.dir, error = %e, "Extras pass failed");
            }
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(self.shared.recent_interval * 4) => {}
            }
        }
    }

    async fn one_pass(&self) -> Result<(), BackfillError> {
        let url = self
            .peer
            .url
            .join(&format!("extras/{}", self.dir))
            .map_err(|e| BackfillError::BadUrl(e.to_string()))?;
        let response = self
            .shared
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BackfillError::Fetch {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(BackfillError::Status {
                url,
                status: response.status(),
            });
        }
        let remote: Vec<String> = response
            .json()
            .await
            .map_err(|source| BackfillError::Fetch { url, source })?;

        let local_dir = self.shared.base_dir.join(&self.dir);
        common::fs::ensure_dir_all(&local_dir)
            .await
            .map_err(segments::SegmentError::from)?;

        for name in remote {
            if self.token.is_cancelled() {
                return Ok(());
            }
            if name.contains('/') || name.starts_with('.') {
                continue;
            }
            let target = local_dir.join(&name);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                continue;
            }
            self.fetch_file(&name, &target).await?;
            self.shared
                .metrics
                .inc("extra_files_fetched_total", &[("dir", &self.dir)]);
        }
        Ok(())
    }

    async fn fetch_file(
        &self,
        name: &str,
        target: &std::path::Path,
    ) -> Result<(), BackfillError> {
        let url = self
            .peer
            .url
            .join(&format!("extras/{}/{}", self.dir, name))
            .map_err(|e| BackfillError::BadUrl(e.to_string()))?;
        let response = self
            .shared
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BackfillError::Fetch {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(BackfillError::Status {
                url,
                status: response.status(),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| BackfillError::Fetch { url, source })?;

        // Same temp-and-rename discipline as segments; names are
        // content-hashed upstream so a rename collision is equal bytes.
        let temp = target.with_extension("part");
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| segments::SegmentError::io("writing file", &temp, e))?;
        tokio::fs::rename(&temp, target)
            .await
            .map_err(|e| segments::SegmentError::io("renaming file", target, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Path as AxumPath, State};
    use axum::routing::get;
    use chrono::Timelike;
    use std::net::SocketAddr;
    use std::time::Duration as StdDuration;

    /// Serve an archive directory with the peer listing/fetch surface.
    async fn serve_archive(base: PathBuf) -> SocketAddr {
        async fn hours(
            State(base): State<PathBuf>,
            AxumPath((channel, quality)): AxumPath<(String, String)>,
        ) -> axum::Json<Vec<String>> {
            axum::Json(
                segments::list::list_hours(&base, &channel, &quality)
                    .await
                    .unwrap_or_default(),
            )
        }
        async fn names(
            State(base): State<PathBuf>,
            AxumPath((channel, quality, hour)): AxumPath<(String, String, String)>,
        ) -> axum::Json<Vec<String>> {
            axum::Json(
                segments::list::list_segments(&base, &channel, &quality, &hour)
                    .await
                    .unwrap_or_default()
                    .iter()
                    .map(SegmentFile::file_name)
                    .collect(),
            )
        }
        async fn bytes(
            State(base): State<PathBuf>,
            AxumPath((channel, quality, hour, name)): AxumPath<(String, String, String, String)>,
        ) -> Vec<u8> {
            tokio::fs::read(base.join(channel).join(quality).join(hour).join(name))
                .await
                .unwrap_or_default()
        }

        let app = Router::new()
            .route("/files/{channel}/{quality}", get(hours))
            .route("/files/{channel}/{quality}/{hour}", get(names))
            .route("/segments/{channel}/{quality}/{hour}/{name}", get(bytes))
            .with_state(base);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn archive_segment(base: &std::path::Path, offset_secs: i64, body: &[u8]) {
        let start = Utc::now()
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap()
            + ChronoDuration::seconds(offset_secs);
        let mut writer = SegmentWriter::create(base, "alpha", "source", start)
            .await
            .unwrap();
        writer.write_chunk(body).await.unwrap();
        writer
            .finalize(StdDuration::from_secs(2), SegmentKind::Full)
            .await
            .unwrap();
    }

    fn filenames(base: &std::path::Path) -> Vec<String> {
        let mut names = Vec::new();
        for entry in walk(base) {
            names.push(entry);
        }
        names.sort();
        names
    }

    fn walk(dir: &std::path::Path) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    out.extend(walk(&path));
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str())
                    && !name.starts_with('.')
                {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    // Two nodes with disjoint losses converge to identical filename
    // sets after a backfill pass in each direction.
    #[tokio::test]
    async fn archives_converge_after_mutual_backfill() {
        let node1 = tempfile::tempdir().unwrap();
        let node2 = tempfile::tempdir().unwrap();

        // N1 got segments 1,2,3; N2 got 1,3,4,5.
        for offset in [0, 2, 4] {
            archive_segment(node1.path(), offset, format!("seg-{offset}").as_bytes()).await;
        }
        for offset in [0, 4, 6, 8] {
            archive_segment(node2.path(), offset, format!("seg-{offset}").as_bytes()).await;
        }

        let addr1 = serve_archive(node1.path().to_path_buf()).await;
        let addr2 = serve_archive(node2.path().to_path_buf()).await;

        let shared_for = |base: &std::path::Path| {
            Arc::new(SharedConfig {
                base_dir: base.to_path_buf(),
                client: reqwest::Client::new(),
                metrics: Arc::new(Metrics::new("backfiller")),
                max_hours_ago: 48,
                fanout: 2,
                recent_interval: StdDuration::from_secs(1),
                full_pass_every: 1,
            })
        };
        let peer = |addr: SocketAddr| Peer {
            name: "peer".to_string(),
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
        };

        let pull_into_1 = BackfillWorker {
            shared: shared_for(node1.path()),
            token: CancellationToken::new(),
            peer: peer(addr2),
            channel: "alpha".to_string(),
            quality: "source".to_string(),
        };
        let pull_into_2 = BackfillWorker {
            shared: shared_for(node2.path()),
            token: CancellationToken::new(),
            peer: peer(addr1),
            channel: "alpha".to_string(),
            quality: "source".to_string(),
        };

        let fetched1 = pull_into_1.one_pass(true).await.unwrap();
        let fetched2 = pull_into_2.one_pass(true).await.unwrap();
        assert_eq!(fetched1, 2); // segments 6 and 8
        assert_eq!(fetched2, 1); // segment 2

        let names1 = filenames(&node1.path().join("alpha/source"));
        let names2 = filenames(&node2.path().join("alpha/source"));
        assert_eq!(names1.len(), 5);
        assert_eq!(names1, names2);

        // A second pass in each direction fetches nothing: converged.
        assert_eq!(pull_into_1.one_pass(true).await.unwrap(), 0);
        assert_eq!(pull_into_2.one_pass(true).await.unwrap(), 0);
    }

    // The hour-window filter and newest-first ordering are the parts of
    // the pass that do not need a live peer.
    #[test]
    fn lookback_window_filters_and_orders() {
        let now = Utc::now();
        let fmt = |hours_ago: i64| {
            segments::path::format_hour(now - ChronoDuration::hours(hours_ago))
        };
        let mut hours = vec![fmt(0), fmt(100), fmt(5), "garbage".to_string()];

        let horizon = now - ChronoDuration::hours(48);
        hours.retain(|hour| match parse_hour(hour) {
            Ok(start) => start + ChronoDuration::hours(1) > horizon,
            Err(_) => false,
        });
        hours.sort();
        hours.reverse();

        assert_eq!(hours, vec![fmt(0), fmt(5)]);
    }
}
