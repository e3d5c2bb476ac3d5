//! Outstanding-work computation.
//!
//! Outstanding identifiers are every identifier seen in the persisted
//! listing pages, in first-seen order, minus those already stored, minus
//! those below the configured threshold.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::checkpoint::Page;

/// Result of reconciling listing pages against stored objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Identifiers to fetch, in first-seen order.
    pub outstanding: Vec<String>,
    /// Items across all pages.
    pub listed: usize,
    /// Distinct identifiers across all pages.
    pub unique: usize,
    /// Items without a usable identifier.
    pub missing_identifier: usize,
    /// Distinct identifiers already stored.
    pub already_stored: usize,
    /// Distinct identifiers skipped by the threshold.
    pub below_threshold: usize,
}

/// Computes the identifiers still to fetch.
#[must_use]
pub fn reconcile(
    pages: &[Page],
    existing: &HashSet<String>,
    identifier_field: &str,
    min_id: Option<i64>,
) -> Reconciliation {
    let mut report = Reconciliation::default();
    let mut seen = HashSet::new();

    for item in pages.iter().flat_map(|page| page.items.iter()) {
        report.listed += 1;
        let Some(identifier) = identifier_of(item, identifier_field) else {
            report.missing_identifier += 1;
            continue;
        };
        if !seen.insert(identifier.clone()) {
            continue;
        }
        if existing.contains(&identifier) {
            report.already_stored += 1;
            continue;
        }
        if let Some(min_id) = min_id
            && !meets_threshold(&identifier, min_id)
        {
            report.below_threshold += 1;
            continue;
        }
        report.outstanding.push(identifier);
    }
    report.unique = seen.len();

    debug!(
        listed = report.listed,
        unique = report.unique,
        already_stored = report.already_stored,
        below_threshold = report.below_threshold,
        missing_identifier = report.missing_identifier,
        outstanding = report.outstanding.len(),
        "reconciled identifiers"
    );
    report
}

/// Extracts the canonical identifier of a listing item.
///
/// Strings are kept verbatim (leading zeros included); integers render in
/// decimal. Missing, null, empty and non-scalar values yield `None`.
#[must_use]
pub fn identifier_of(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Returns whether `identifier` is at or above `min_id`.
///
/// Identifiers that are not integers pass, since they cannot be shown to
/// fall below the threshold.
#[must_use]
pub fn meets_threshold(identifier: &str, min_id: i64) -> bool {
    identifier
        .trim()
        .parse::<i64>()
        .map_or(true, |n| n >= min_id)
}
