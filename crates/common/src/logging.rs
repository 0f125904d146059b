//! Logging setup shared by all component binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter directive.
pub const LOG_ENV_VAR: &str = "WUBLOADER_LOG";

/// Initialize tracing with an env-overridable filter.
///
/// `default_directive` is used when `WUBLOADER_LOG` is unset or invalid,
/// e.g. `"downloader=info,common=info"`.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
