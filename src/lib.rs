//! Harvester Core Library
//!
//! This library provides the adaptive concurrent harvesting engine: it walks
//! a paginated listing endpoint, works out which full objects are still
//! missing locally, fetches them under self-adjusting concurrency, and
//! persists everything so an interrupted run resumes where it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Environment-style configuration and entity descriptors
//! - [`transport`] - HTTP transport, failure classification and retry wrapper
//! - [`throttle`] - Consecutive-failure controller driving delay and concurrency
//! - [`checkpoint`] - Write-once page/object storage used for resume and dedup
//! - [`harvest`] - Crawler, reconciler, fetcher and orchestrator

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod config;
pub mod harvest;
pub mod throttle;
pub mod transport;

// Re-export commonly used types
pub use checkpoint::{
    CheckpointError, CheckpointStore, FsCheckpointStore, ObjectRecord, Page, PageScan,
};
pub use config::{ConfigError, EntitySpec, HarvestConfig, default_entities, load_entities_file};
pub use harvest::{
    CrawlReport, EntityReport, EntityStatus, FetchCounts, FetchOutcome, FetchStats, HarvestError,
    HarvestSummary, Harvester, ObjectFetcher, PageCrawler, Reconciliation, RunMode, RunState,
    entity_status, reconcile,
};
pub use throttle::{ErrorState, ThrottleController, ThrottleMode};
pub use transport::{
    ApiRequest, FailureKind, HttpTransport, RetryPolicy, Transport, TransportError, classify_error,
};
