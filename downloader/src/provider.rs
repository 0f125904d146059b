//! Upstream playlist access: master fetch, variant selection, and
//! access-token refresh.

use m3u8_rs::{MasterPlaylist, MediaPlaylist, parse_playlist_res};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned {status} for {url}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[error("playlist error: {0}")]
    Playlist(String),

    #[error("no variant matching quality {quality:?}; upstream offers {available:?}")]
    NoSuchVariant {
        quality: String,
        available: Vec<String>,
    },
}

impl ProviderError {
    /// Auth failures trigger a token refresh instead of a plain retry.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::Status { status, .. }
                if *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Fetch { source, .. } => common::retry::transient_http_error(source),
            ProviderError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

pub struct Upstream {
    client: reqwest::Client,
    base: Url,
    auth_url: Option<Url>,
    access_token: RwLock<Option<String>>,
}

impl Upstream {
    pub fn new(base: Url, auth_url: Option<Url>) -> Self {
        Self {
            client: common::http::build_client(Some(Duration::from_secs(30))),
            base,
            auth_url,
            access_token: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn get(&self, url: &Url) -> Result<bytes::Bytes, ProviderError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = self.access_token.read().await.as_deref() {
            request = request.query(&[("token", token)]);
        }
        let response = request.send().await.map_err(|source| ProviderError::Fetch {
            url: url.clone(),
            source,
        })?;
        if !response.status().is_success() {
            return Err(ProviderError::Status {
                url: url.clone(),
                status: response.status(),
            });
        }
        response.bytes().await.map_err(|source| ProviderError::Fetch {
            url: url.clone(),
            source,
        })
    }

    /// Fetch a fresh access token, if an auth endpoint is configured.
    /// Gaps during refresh are tolerated; the backfiller recovers them.
    pub async fn refresh_token(&self, channel: &str) -> bool {
        let Some(auth_url) = &self.auth_url else {
            return false;
        };
        let result = self
            .client
            .get(auth_url.clone())
            .query(&[("channel", channel)])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(token) => {
                    info!(channel, "Refreshed upstream access token");
                    *self.access_token.write().await = Some(token.trim().to_string());
                    true
                }
                Err(e) => {
                    warn!(channel, error = %e, "Token response unreadable");
                    false
                }
            },
            Ok(response) => {
                warn!(channel, status = %response.status(), "Token refresh refused");
                false
            }
            Err(e) => {
                warn!(channel, error = %e, "Token refresh failed");
                false
            }
        }
    }

    pub fn master_url(&self, channel: &str) -> Result<Url, ProviderError> {
        self.base
            .join(&format!("{channel}.m3u8"))
            .map_err(|e| ProviderError::Playlist(format!("bad channel {channel:?}: {e}")))
    }

    pub async fn fetch_master(&self, channel: &str) -> Result<MasterPlaylist, ProviderError> {
        let url = self.master_url(channel)?;
        let body = self.get(&url).await?;
        match parse_playlist_res(&body) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(playlist)) => Ok(playlist),
            Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => Err(ProviderError::Playlist(format!(
                "{url} is a media playlist, expected a master playlist"
            ))),
            Err(e) => Err(ProviderError::Playlist(format!("parsing {url}: {e}"))),
        }
    }

    pub async fn fetch_media(&self, url: &Url) -> Result<MediaPlaylist, ProviderError> {
        let body = self.get(url).await?;
        match parse_playlist_res(&body) {
            Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => Ok(playlist),
            Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => Err(ProviderError::Playlist(format!(
                "{url} is a master playlist, expected a media playlist"
            ))),
            Err(e) => Err(ProviderError::Playlist(format!("parsing {url}: {e}"))),
        }
    }
}

/// Pick the media playlist URI for a quality name.
///
/// "source" is the highest-bandwidth variant; any other name must match
/// the variant's video attribute.
pub fn select_variant<'a>(
    master: &'a MasterPlaylist,
    quality: &str,
) -> Result<&'a m3u8_rs::VariantStream, ProviderError> {
    if master.variants.is_empty() {
        return Err(ProviderError::Playlist(
            "master playlist has no variants".to_string(),
        ));
    }
    if quality == "source" {
        return master
            .variants
            .iter()
            .max_by_key(|v| v.bandwidth)
            .ok_or_else(|| ProviderError::Playlist("no variants".to_string()));
    }
    master
        .variants
        .iter()
        .find(|v| v.video.as_deref() == Some(quality))
        .ok_or_else(|| ProviderError::NoSuchVariant {
            quality: quality.to_string(),
            available: master
                .variants
                .iter()
                .filter_map(|v| v.video.clone())
                .collect(),
        })
}
