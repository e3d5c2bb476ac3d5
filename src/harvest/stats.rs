//! Per-identifier fetch outcomes and the counters aggregating them.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::checkpoint::ObjectRecord;

/// Result of fetching one identifier.
///
/// Only [`FetchOutcome::Success`] produces a stored record. Failures are
/// reported through this type and never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Fetched and stored.
    Success(ObjectRecord),
    /// Found on disk by the pre-dispatch check; no request was made.
    AlreadyStored,
    /// The service answered 401, 403, 404 or 410.
    NotFound,
    /// The payload stayed empty or malformed across every attempt.
    Invalid,
    /// Connect or server failures exhausted the retry budget.
    TransientFailure(String),
    /// Any other client error, or the record could not be stored.
    PermanentFailure(String),
}

impl FetchOutcome {
    /// Stable label for logs and summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::AlreadyStored => "already_stored",
            Self::NotFound => "not_found",
            Self::Invalid => "invalid",
            Self::TransientFailure(_) => "transient",
            Self::PermanentFailure(_) => "permanent",
        }
    }

    /// Returns whether the identifier counts as failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success(_) | Self::AlreadyStored)
    }
}

/// Thread-safe outcome counters shared by fetch tasks.
#[derive(Debug, Default)]
pub struct FetchStats {
    stored: AtomicUsize,
    already_stored: AtomicUsize,
    not_found: AtomicUsize,
    invalid: AtomicUsize,
    transient: AtomicUsize,
    permanent: AtomicUsize,
    retried: AtomicUsize,
}

impl FetchStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one outcome.
    pub fn record(&self, outcome: &FetchOutcome) {
        let counter = match outcome {
            FetchOutcome::Success(_) => &self.stored,
            FetchOutcome::AlreadyStored => &self.already_stored,
            FetchOutcome::NotFound => &self.not_found,
            FetchOutcome::Invalid => &self.invalid,
            FetchOutcome::TransientFailure(_) => &self.transient,
            FetchOutcome::PermanentFailure(_) => &self.permanent,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts retry attempts beyond the first.
    pub fn add_retries(&self, retries: u32) {
        self.retried
            .fetch_add(retries as usize, Ordering::SeqCst);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> FetchCounts {
        FetchCounts {
            stored: self.stored.load(Ordering::SeqCst),
            already_stored: self.already_stored.load(Ordering::SeqCst),
            not_found: self.not_found.load(Ordering::SeqCst),
            invalid: self.invalid.load(Ordering::SeqCst),
            transient: self.transient.load(Ordering::SeqCst),
            permanent: self.permanent.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
        }
    }
}

/// Plain copy of [`FetchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCounts {
    /// Objects fetched and stored in this run.
    pub stored: usize,
    /// Objects skipped because they appeared on disk meanwhile.
    pub already_stored: usize,
    /// Identifiers the service does not serve.
    pub not_found: usize,
    /// Identifiers whose payload never parsed.
    pub invalid: usize,
    /// Identifiers that exhausted retries on connect or server failures.
    pub transient: usize,
    /// Identifiers that failed terminally.
    pub permanent: usize,
    /// Retry attempts beyond the first, across all identifiers.
    pub retried: usize,
}

impl FetchCounts {
    /// Identifiers that did not end up stored.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.not_found + self.invalid + self.transient + self.permanent
    }

    /// Identifiers processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.stored + self.already_stored + self.failed()
    }

    /// Adds another set of counts into this one.
    pub fn merge(&mut self, other: &Self) {
        self.stored += other.stored;
        self.already_stored += other.already_stored;
        self.not_found += other.not_found;
        self.invalid += other.invalid;
        self.transient += other.transient;
        self.permanent += other.permanent;
        self.retried += other.retried;
    }
}
