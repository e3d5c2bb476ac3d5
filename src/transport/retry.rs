//! Failure classification and the single retryable-call wrapper.
//!
//! Every transport call in the engine routes through [`retry_call`], which is
//! parameterized by a classification function (error → [`FailureKind`]) and a
//! [`RetryPolicy`] holding a fixed, ordered delay schedule.
//!
//! # Overview
//!
//! When a request fails, the error is classified into a [`FailureKind`]:
//! - [`FailureKind::Connect`] - Could not reach the server (retryable)
//! - [`FailureKind::Server`] - 5xx, timeout, 408, 429 (retryable)
//! - [`FailureKind::Client`] - Other 4xx (terminal, never retried)
//! - [`FailureKind::Parse`] - Empty or malformed payload (retryable)
//! - [`FailureKind::Storage`] - Local persistence failure (terminal)
//!
//! # Example
//!
//! ```
//! use harvester_core::transport::{FailureKind, RetryDecision, RetryPolicy, TransportError, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = TransportError::http_status("/get/object", 503);
//! let kind = classify_error(&error);
//! assert_eq!(kind, FailureKind::Server);
//! assert!(matches!(policy.should_retry(kind, 1), RetryDecision::Retry { .. }));
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::TransportError;

/// Default maximum attempts (including the first one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default retry delay schedule: short, medium, long.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Transport-level failure: DNS, refused or reset connection.
    Connect,
    /// Server-side trouble: 5xx, timeouts, 408 and 429.
    Server,
    /// Client error (4xx). The request will not succeed on retry.
    Client,
    /// Empty or malformed payload. Often transient on this service.
    Parse,
    /// Local persistence failure.
    Storage,
}

impl FailureKind {
    /// Returns whether a failure of this kind may succeed on retry.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Connect | Self::Server | Self::Parse)
    }

    /// Returns whether this failure says something about server health.
    ///
    /// Client and storage failures do not feed the throttle controller.
    #[must_use]
    pub fn indicates_server_stress(self) -> bool {
        self.is_retryable()
    }

    /// Stable label for logs and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Server => "server",
            Self::Client => "client",
            Self::Parse => "parse",
            Self::Storage => "storage",
        }
    }
}

/// Decision on whether to retry a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry behavior: an attempt cap and an ordered delay schedule.
///
/// The delay after failed attempt `n` is `delays[n - 1]`, clamped to the last
/// entry, plus up to `max_jitter` of random jitter (none by default).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delays indexed by failed attempt.
    delays: Vec<Duration>,

    /// Upper bound for random jitter added to each delay.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with an attempt cap and a delay schedule.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
            max_jitter: Duration::ZERO,
        }
    }

    /// Adds random jitter of up to `max_jitter` to each delay.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay schedule.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed with `kind`.
    #[instrument(level = "trace", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("{} failure - retry would not help", kind.as_str()),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            attempt: attempt + 1,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    fn delay_for(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let base = self
            .delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        base + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Classifies a transport error into a [`FailureKind`].
///
/// | Error | Kind |
/// |-------|------|
/// | Connect | Connect |
/// | Timeout, 5xx, 408, 429 | Server |
/// | Other 4xx, invalid request | Client |
/// | Empty body, malformed, not an object | Parse |
#[must_use]
pub fn classify_error(error: &TransportError) -> FailureKind {
    match error {
        TransportError::Connect { .. } => FailureKind::Connect,
        TransportError::Timeout { .. } => FailureKind::Server,
        TransportError::HttpStatus { status, .. } => classify_http_status(*status),
        TransportError::EmptyBody { .. }
        | TransportError::Malformed { .. }
        | TransportError::NotAnObject { .. } => FailureKind::Parse,
        TransportError::InvalidRequest { .. } => FailureKind::Client,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureKind {
    match status {
        408 => FailureKind::Server, // Request Timeout
        429 => FailureKind::Server, // Too Many Requests
        status if (400..500).contains(&status) => FailureKind::Client,
        status if (500..600).contains(&status) => FailureKind::Server,
        // 1xx/3xx leaking through means something odd upstream; worth another try
        _ => FailureKind::Server,
    }
}

/// Runs `op` until it succeeds, fails terminally, or exhausts the policy.
///
/// `op` receives the 1-indexed attempt number. `on_failure` is called for
/// every failed attempt with the error, its classification and the attempt
/// number, before any backoff sleep.
///
/// # Returns
///
/// - `Ok((value, attempts))` on success
/// - `Err((error, attempts))` with the last error once retrying stops
pub async fn retry_call<T, E, F, Fut, C, H>(
    policy: &RetryPolicy,
    classify: C,
    mut on_failure: H,
    mut op: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> FailureKind,
    H: FnMut(&E, FailureKind, u32),
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                let kind = classify(&error);
                on_failure(&error, kind, attempt);

                match policy.should_retry(kind, attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        debug!(
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            kind = kind.as_str(),
                            error = %error,
                            "retrying call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(attempt, %reason, error = %error, "not retrying call");
                        return Err((error, attempt));
                    }
                }
            }
        }
    }
}
