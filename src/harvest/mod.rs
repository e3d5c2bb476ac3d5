//! The harvesting pipeline: crawl, reconcile, fetch.
//!
//! # Overview
//!
//! - [`PageCrawler`] - Walks a listing until the first empty page
//! - [`reconcile`] - Listed identifiers minus stored ones, threshold applied
//! - [`ObjectFetcher`] - Throttled, retried, chunked object fetches
//! - [`Harvester`] - Runs the pipeline per entity and aggregates a summary
//! - [`entity_status`] - Completion report from the checkpoint alone
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::{HarvestConfig, Harvester, RunMode, default_entities};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let harvester = Harvester::from_config(HarvestConfig::from_env()?)?
//!     .with_mode(RunMode::Sequential);
//! let summary = harvester.run(&default_entities()).await;
//! println!("{} objects stored, state {}", summary.totals().stored, summary.state());
//! # Ok(())
//! # }
//! ```

mod crawler;
mod error;
mod fetcher;
mod orchestrator;
mod pool;
mod reconcile;
mod request;
mod stats;
mod status;

pub use crawler::{CrawlReport, PageCrawler};
pub use error::HarvestError;
pub use fetcher::ObjectFetcher;
pub use orchestrator::{EntityReport, HarvestSummary, Harvester, RunMode, RunState};
pub use pool::TaskPool;
pub use reconcile::{Reconciliation, identifier_of, meets_threshold, reconcile};
pub use stats::{FetchCounts, FetchOutcome, FetchStats};
pub use status::{EntityStatus, entity_status};
