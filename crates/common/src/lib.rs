//! Shared plumbing for wubloader components.
//!
//! Every long-lived component uses the same retry policy, metrics
//! registry, logging setup, shutdown handling, and observability
//! listener. Nothing in here knows about segments or events.

pub mod fs;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod observe;
pub mod retry;
pub mod shutdown;

pub use metrics::Metrics;
pub use retry::{AttemptOutcome, Backoff, RetryError, with_backoff};
