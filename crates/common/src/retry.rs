//! Backoff for the outbound surfaces.
//!
//! Two callers, two shapes: the downloader gives up on a segment after
//! a few tries (a live segment loses its value fast, and whatever bytes
//! arrived are still archivable as partial), while the backfiller never
//! gives up on a peer, it just stretches its cadence. Both draw their
//! delays from one [`Backoff`] schedule with equal jitter.

use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A mutable backoff schedule. Every [`next_delay`](Backoff::next_delay)
/// call consumes one try and doubles the step, up to the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    first: Duration,
    cap: Duration,
    budget: Option<u32>,
    step: Duration,
    used: u32,
}

impl Backoff {
    pub fn new(first: Duration, cap: Duration, budget: Option<u32>) -> Self {
        Self {
            first,
            cap,
            budget,
            step: first,
            used: 0,
        }
    }

    /// Schedule for upstream segment downloads: three more tries after
    /// the first attempt, then the caller salvages what it has.
    pub fn segment_fetch() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5), Some(3))
    }

    /// Schedule for a failing peer: stretch from the worker's normal
    /// cadence up to five minutes, without a budget. Peers come back.
    pub fn peer_backfill(cadence: Duration) -> Self {
        Self::new(cadence.saturating_mul(2), Duration::from_secs(300), None)
    }

    /// Forget accumulated failures and start over from the first delay.
    pub fn reset(&mut self) {
        self.step = self.first;
        self.used = 0;
    }

    /// The next delay to sleep, or `None` once the try budget is spent.
    ///
    /// Equal jitter: half the current step is fixed, the other half
    /// random, so workers that failed together spread out without ever
    /// backing off less than half a step.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(budget) = self.budget
            && self.used >= budget
        {
            return None;
        }
        self.used += 1;

        let step = self.step.min(self.cap);
        self.step = step.saturating_mul(2).min(self.cap);

        let half = step / 2;
        let spread_ms = u64::try_from(half.as_millis()).unwrap_or(0);
        let jitter = if spread_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=spread_ms))
        };
        Some((half + jitter).min(self.cap))
    }
}

/// What one attempt produced.
pub enum AttemptOutcome<T, E> {
    /// Finished; stop here.
    Done(T),
    /// Worth another attempt after a delay.
    Transient(E),
    /// The request itself is wrong; more attempts cannot help.
    Permanent(E),
}

/// Terminal result of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Inner(E),
}

/// Drive an operation against a backoff schedule until it finishes,
/// fails permanently, runs the schedule dry, or the token cancels.
pub async fn with_backoff<F, Fut, T, E>(
    mut backoff: Backoff,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptOutcome<T, E>>,
    E: std::error::Error + 'static,
{
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        let error = match operation().await {
            AttemptOutcome::Done(value) => return Ok(value),
            AttemptOutcome::Permanent(error) => return Err(RetryError::Inner(error)),
            AttemptOutcome::Transient(error) => error,
        };
        let Some(delay) = backoff.next_delay() else {
            return Err(RetryError::Inner(error));
        };
        warn!(
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Backing off after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Whether a reqwest failure is worth another attempt.
///
/// Anything connection-level or mid-body is transient; a
/// redirect-policy, status, or request-builder failure means the
/// request itself is wrong.
pub fn transient_http_error(e: &reqwest::Error) -> bool {
    !(e.is_builder() || e.is_redirect() || e.is_status())
}
