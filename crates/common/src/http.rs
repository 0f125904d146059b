//! Shared HTTP client construction.

use std::time::Duration;
use tracing::warn;

/// User agent sent on all outbound requests.
pub const USER_AGENT: &str = concat!("wubloader/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with sane timeouts.
///
/// `request_timeout` bounds the whole request including the body; pass
/// `None` for endpoints that stream indefinitely (cut responses) and rely
/// on the connect timeout only.
pub fn build_client(request_timeout: Option<Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10));

    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(error = %error, "Failed to build HTTP client; falling back to defaults");
        reqwest::Client::new()
    })
}
