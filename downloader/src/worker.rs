//! Per (channel, quality) download worker.
//!
//! Polls the media playlist at a cadence derived from its target
//! duration, schedules new segments in playlist order, and fans out
//! downloads under a bounded semaphore. Completion order is unordered;
//! visibility is atomic per segment via the writer's rename.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use m3u8_rs::MediaPlaylist;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use common::Metrics;

use crate::fetch::{FetchError, SegmentJob, download_segment};
use crate::provider::{Upstream, select_variant};

/// How many recently scheduled segment URIs to remember for dedup.
const SEEN_CAPACITY: usize = 256;

/// Re-resolve the master playlist after repeated media failures.
const MEDIA_FAILURES_BEFORE_RESELECT: u32 = 5;

pub struct DownloadWorker {
    pub base_dir: PathBuf,
    pub upstream: Arc<Upstream>,
    pub metrics: Arc<Metrics>,
    pub token: CancellationToken,
    pub channel: String,
    pub quality: String,
    pub important: bool,
    pub fanout: usize,
}

impl DownloadWorker {
    pub async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.fanout));
        let mut seen = SeenSet::new(SEEN_CAPACITY);
        // Everything downloaded before we have seen one full playlist
        // cycle is suspect: the worker may have started mid-segment.
        let mut fresh_start = true;

        while !self.token.is_cancelled() {
            let media_url = match self.resolve_media_url().await {
                Some(url) => url,
                None => {
                    if self.sleep(Duration::from_secs(5)).await {
                        return;
                    }
                    continue;
                }
            };

            let mut media_failures = 0u32;
            while !self.token.is_cancelled() && media_failures < MEDIA_FAILURES_BEFORE_RESELECT {
                let playlist = match self.upstream.fetch_media(&media_url).await {
                    Ok(playlist) => {
                        self.metrics
                            .inc("playlist_fetches_total", &[("result", "ok")]);
                        media_failures = 0;
                        playlist
                    }
                    Err(e) => {
                        self.metrics
                            .inc("playlist_fetches_total", &[("result", "error")]);
                        media_failures += 1;
                        warn!(channel = %self.channel, error = %e, "Media playlist fetch failed");
                        if self.sleep(Duration::from_secs(2)).await {
                            return;
                        }
                        continue;
                    }
                };

                if playlist.segments.is_empty() || playlist.end_list {
                    if self.important {
                        warn!(
                            channel = %self.channel,
                            "Important channel appears offline"
                        );
                    } else {
                        debug!(channel = %self.channel, "Channel appears offline");
                    }
                }

                self.schedule_segments(
                    &media_url,
                    &playlist,
                    &mut seen,
                    &semaphore,
                    &mut fresh_start,
                );

                let cadence = self.poll_interval(&playlist);
                if self.sleep(cadence).await {
                    return;
                }
            }
        }
    }

    /// Poll at half the target duration, a quarter for important
    /// channels, never faster than once a second.
    fn poll_interval(&self, playlist: &MediaPlaylist) -> Duration {
        let target = playlist.target_duration.max(1) as f64;
        let divisor = if self.important { 4.0 } else { 2.0 };
        Duration::from_secs_f64((target / divisor).max(1.0))
    }

    async fn resolve_media_url(&self) -> Option<Url> {
        let master = match self.upstream.fetch_master(&self.channel).await {
            Ok(master) => master,
            Err(e) if e.is_auth_failure() => {
                self.upstream.refresh_token(&self.channel).await;
                return None;
            }
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Master playlist fetch failed");
                return None;
            }
        };
        let variant = match select_variant(&master, &self.quality) {
            Ok(variant) => variant,
            Err(e) => {
                warn!(channel = %self.channel, quality = %self.quality, error = %e, "Variant selection failed");
                return None;
            }
        };
        let master_url = self.upstream.master_url(&self.channel).ok()?;
        match master_url.join(&variant.uri) {
            Ok(url) => {
                info!(channel = %self.channel, quality = %self.quality, %url, "Selected media playlist");
                Some(url)
            }
            Err(e) => {
                warn!(uri = %variant.uri, error = %e, "Bad variant URI");
                None
            }
        }
    }

    /// Walk the playlist in order, spawning a download for each segment
    /// we have not scheduled yet.
    fn schedule_segments(
        &self,
        media_url: &Url,
        playlist: &MediaPlaylist,
        seen: &mut SeenSet,
        semaphore: &Arc<Semaphore>,
        fresh_start: &mut bool,
    ) {
        // Wall-clock times: prefer per-segment program date-time, else
        // chain from the previous segment's end.
        let mut next_start: Option<DateTime<Utc>> = None;

        for segment in &playlist.segments {
            let start = segment
                .program_date_time
                .map(|pdt| pdt.with_timezone(&Utc))
                .or(next_start)
                .unwrap_or_else(Utc::now);
            next_start =
                Some(start + ChronoDuration::milliseconds((segment.duration * 1000.0) as i64));

            if !seen.insert(&segment.uri) {
                continue;
            }

            let url = match media_url.join(&segment.uri) {
                Ok(url) => url,
                Err(e) => {
                    warn!(uri = %segment.uri, error = %e, "Bad segment URI");
                    continue;
                }
            };

            let job = SegmentJob {
                url,
                start,
                advertised_duration: segment.duration as f64,
                suspect_hint: segment.discontinuity || *fresh_start,
            };
            *fresh_start = false;

            let upstream = self.upstream.clone();
            let base_dir = self.base_dir.clone();
            let metrics = self.metrics.clone();
            let token = self.token.clone();
            let channel = self.channel.clone();
            let quality = self.quality.clone();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                // Bounded fan-out; a closed semaphore means shutdown.
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                match download_segment(&upstream, &base_dir, &channel, &quality, &job, &token).await
                {
                    Ok(segment) => {
                        metrics.inc("segments_total", &[("kind", segment.kind.as_str())]);
                        metrics.inc_by(
                            "segment_bytes_total",
                            &[],
                            std::fs::metadata(base_dir.join(segment.rel_path()))
                                .map(|m| m.len())
                                .unwrap_or(0),
                        );
                    }
                    Err(FetchError::Cancelled) => {}
                    Err(e) => {
                        metrics.inc("segments_failed_total", &[]);
                        warn!(channel, quality, error = %e, "Segment abandoned");
                    }
                }
            });
        }
    }

    /// Sleep, returning true when shutdown was requested.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

/// Bounded set of recently scheduled URIs.
struct SeenSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false when the URI was already scheduled.
    fn insert(&mut self, uri: &str) -> bool {
        if self.set.contains(uri) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.set.remove(&evicted);
        }
        self.set.insert(uri.to_string());
        self.order.push_back(uri.to_string());
        true
    }
}
