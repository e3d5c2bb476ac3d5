//! Per-entity pipeline and run-level aggregation.
//!
//! Each entity runs crawl, reconcile and fetch with its own throttle
//! controller and its own pools. A failing entity is recorded in the
//! summary and never stops its siblings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressDrawTarget};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::HarvestError;
use super::crawler::{CrawlReport, PageCrawler};
use super::fetcher::ObjectFetcher;
use super::pool::TaskPool;
use super::reconcile::{Reconciliation, reconcile};
use super::stats::FetchCounts;
use crate::checkpoint::{CheckpointStore, FsCheckpointStore};
use crate::config::{EntitySpec, HarvestConfig};
use crate::transport::{HttpTransport, Transport};

/// How entities are scheduled relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// One entity after another.
    Sequential,
    /// All entities at once, each with independent pools and throttle.
    #[default]
    Concurrent,
}

/// Operator-facing completion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Listing walked to the end and every outstanding object stored.
    Complete,
    /// Progress made, but a rerun has work left.
    Partial,
    /// No progress possible: setup failed or every attempt failed with a
    /// retryable kind.
    Blocked,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

/// Result of harvesting one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityReport {
    /// Listing entity name.
    pub entity: String,
    /// Listing walk, or `None` when the crawl was skipped or never ran.
    pub crawl: Option<CrawlReport>,
    /// Outstanding-work computation.
    pub reconciliation: Reconciliation,
    /// Persisted page files that could not be read and were left out.
    pub skipped_pages: usize,
    /// Fetch outcome counters.
    pub fetch: FetchCounts,
    /// Entity-level failure, if the entity was aborted.
    pub error: Option<String>,
    /// Whether the run was interrupted before this entity finished.
    pub interrupted: bool,
    /// Wall time spent on this entity.
    pub elapsed: Duration,
}

impl EntityReport {
    fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            ..Self::default()
        }
    }

    /// Identifiers that were outstanding when fetching started.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.reconciliation.outstanding.len()
    }

    /// Completion state of this entity.
    ///
    /// Objects the server reports as gone (`NotFound`) are settled and do
    /// not hold an entity back from `Complete`. An entity is `Blocked` only
    /// when it was aborted or every fetch attempt failed with a retryable
    /// kind.
    #[must_use]
    pub fn state(&self) -> RunState {
        if self.error.is_some() {
            return RunState::Blocked;
        }
        let attempted = self.fetch.total();
        let retryable = self.fetch.transient + self.fetch.invalid;
        if attempted > 0 && retryable == attempted {
            return RunState::Blocked;
        }
        let crawl_incomplete = self.crawl.as_ref().is_some_and(|c| !c.is_complete());
        if crawl_incomplete
            || self.interrupted
            || self.skipped_pages > 0
            || retryable + self.fetch.permanent > 0
            || attempted < self.outstanding()
        {
            return RunState::Partial;
        }
        RunState::Complete
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    /// Per-entity reports in configuration order.
    pub entities: Vec<EntityReport>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl HarvestSummary {
    /// Fetch counters summed over all entities.
    #[must_use]
    pub fn totals(&self) -> FetchCounts {
        let mut totals = FetchCounts::default();
        for report in &self.entities {
            totals.merge(&report.fetch);
        }
        totals
    }

    /// Worst state across entities: complete only if all are complete,
    /// blocked only if all are blocked.
    #[must_use]
    pub fn state(&self) -> RunState {
        let states: Vec<RunState> = self.entities.iter().map(EntityReport::state).collect();
        if states.iter().all(|s| *s == RunState::Complete) {
            RunState::Complete
        } else if !states.is_empty() && states.iter().all(|s| *s == RunState::Blocked) {
            RunState::Blocked
        } else {
            RunState::Partial
        }
    }
}

/// Runs the crawl, reconcile and fetch pipeline for a set of entities.
#[derive(Clone)]
pub struct Harvester {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CheckpointStore>,
    config: HarvestConfig,
    mode: RunMode,
    skip_crawl: bool,
    interrupt: Arc<AtomicBool>,
    progress: MultiProgress,
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("skip_crawl", &self.skip_crawl)
            .finish_non_exhaustive()
    }
}

impl Harvester {
    /// Creates a harvester over explicit transport and store.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CheckpointStore>,
        config: HarvestConfig,
    ) -> Self {
        let progress = if config.show_progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self {
            transport,
            store,
            config,
            mode: RunMode::default(),
            skip_crawl: false,
            interrupt: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    /// Creates a harvester with the HTTP transport and the filesystem store
    /// described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] for invalid settings and
    /// [`HarvestError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: HarvestConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        let transport =
            HttpTransport::with_options(&config.base_url, config.cookie.as_deref(), config.timeout)?;
        let store = FsCheckpointStore::new(&config.data_dir);
        Ok(Self::new(Arc::new(transport), Arc::new(store), config))
    }

    /// Sets the scheduling mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Skips the listing walk and works from persisted pages only.
    #[must_use]
    pub fn with_skip_crawl(mut self, skip_crawl: bool) -> Self {
        self.skip_crawl = skip_crawl;
        self
    }

    /// Flag that stops dispatch of further work when set.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Harvests every entity according to the run mode.
    #[instrument(skip(self, entities), fields(entities = entities.len(), mode = ?self.mode))]
    pub async fn run(&self, entities: &[EntitySpec]) -> HarvestSummary {
        let started = Instant::now();
        info!("harvest run started");

        let reports = match self.mode {
            RunMode::Sequential => {
                let mut reports = Vec::with_capacity(entities.len());
                for entity in entities {
                    reports.push(self.harvest_entity(entity).await);
                }
                reports
            }
            RunMode::Concurrent => self.run_concurrent(entities).await,
        };

        let summary = HarvestSummary {
            entities: reports,
            elapsed: started.elapsed(),
        };
        let totals = summary.totals();
        info!(
            state = %summary.state(),
            stored = totals.stored,
            failed = totals.failed(),
            elapsed_secs = summary.elapsed.as_secs(),
            "harvest run finished"
        );
        summary
    }

    async fn run_concurrent(&self, entities: &[EntitySpec]) -> Vec<EntityReport> {
        let mut slots: Vec<Option<EntityReport>> = vec![None; entities.len()];
        let mut pool: TaskPool<(usize, EntityReport)> = TaskPool::new(entities.len());

        for (position, entity) in entities.iter().enumerate() {
            let harvester = self.clone();
            let entity = entity.clone();
            let spawned = pool
                .spawn(async move { (position, harvester.harvest_entity(&entity).await) })
                .await;
            if let Err(e) = spawned {
                let mut report = EntityReport::new(&entities[position].name);
                report.error = Some(e.to_string());
                slots[position] = Some(report);
            }
        }

        while let Some(joined) = pool.next().await {
            match joined {
                Ok((position, report)) => slots[position] = Some(report),
                Err(e) => error!(error = %e, "entity task failed"),
            }
        }

        slots
            .into_iter()
            .zip(entities)
            .map(|(slot, entity)| {
                slot.unwrap_or_else(|| {
                    let mut report = EntityReport::new(&entity.name);
                    report.error = Some("entity task did not complete".to_string());
                    report
                })
            })
            .collect()
    }

    /// Runs the pipeline for one entity; failures end up in the report.
    #[instrument(skip(self, entity), fields(entity = %entity.name))]
    pub async fn harvest_entity(&self, entity: &EntitySpec) -> EntityReport {
        let started = Instant::now();
        let mut report = EntityReport::new(&entity.name);

        if let Err(e) = self.try_harvest_entity(entity, &mut report).await {
            error!(error = %e, "entity aborted");
            report.error = Some(e.to_string());
        }
        report.interrupted = self.interrupt.load(Ordering::SeqCst);
        report.elapsed = started.elapsed();

        info!(
            state = %report.state(),
            pages = report.crawl.as_ref().map_or(0, |c| c.pages),
            outstanding = report.outstanding(),
            stored = report.fetch.stored,
            failed = report.fetch.failed(),
            "entity finished"
        );
        report
    }

    async fn try_harvest_entity(
        &self,
        entity: &EntitySpec,
        report: &mut EntityReport,
    ) -> Result<(), HarvestError> {
        let throttle = self.config.throttle();
        let policy = self.config.retry_policy();

        if self.skip_crawl {
            info!("listing walk skipped");
        } else {
            let crawler = PageCrawler::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.store),
                throttle.clone(),
                policy.clone(),
            )
            .with_page_length(self.config.page_length)
            .with_concurrency(self.config.max_concurrent_pages)
            .with_interrupt(Arc::clone(&self.interrupt));
            let crawl = crawler.crawl(entity).await?;
            if let Some(reason) = &crawl.halted {
                warn!(%reason, "continuing with the pages persisted so far");
            }
            report.crawl = Some(crawl);
        }

        let scan = self
            .store
            .list_pages(&entity.name)
            .await
            .map_err(|e| HarvestError::checkpoint(&entity.name, e))?;
        if !scan.skipped.is_empty() {
            warn!(skipped = ?scan.skipped, "unreadable pages left out of reconciliation");
        }
        report.skipped_pages = scan.skipped.len();
        let existing = self
            .store
            .list_object_ids(&entity.name)
            .await
            .map_err(|e| HarvestError::checkpoint(&entity.name, e))?;
        report.reconciliation = reconcile(
            &scan.pages,
            &existing,
            &entity.identifier_field,
            self.config.min_id,
        );

        if report.reconciliation.outstanding.is_empty() {
            info!("nothing outstanding");
            return Ok(());
        }

        let fetcher = ObjectFetcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            throttle,
            policy,
        )
        .with_concurrency(self.config.max_concurrent_objects)
        .with_batch_size(self.config.batch_size)
        .with_interrupt(Arc::clone(&self.interrupt))
        .with_progress(self.progress.clone());
        report.fetch = fetcher
            .fetch_all(entity, &report.reconciliation.outstanding)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn report_with(fetch: FetchCounts, outstanding: usize) -> EntityReport {
        EntityReport {
            entity: "Plan".to_string(),
            crawl: Some(CrawlReport::default()),
            reconciliation: Reconciliation {
                outstanding: (0..outstanding).map(|n| n.to_string()).collect(),
                ..Reconciliation::default()
            },
            fetch,
            ..EntityReport::default()
        }
    }

    #[test]
    fn test_state_complete_when_everything_stored() {
        let report = report_with(
            FetchCounts {
                stored: 3,
                ..FetchCounts::default()
            },
            3,
        );
        assert_eq!(report.state(), RunState::Complete);
    }

    #[test]
    fn test_state_complete_when_nothing_outstanding() {
        assert_eq!(
            report_with(FetchCounts::default(), 0).state(),
            RunState::Complete
        );
    }

    #[test]
    fn test_state_not_found_is_settled() {
        let report = report_with(
            FetchCounts {
                stored: 99,
                not_found: 1,
                ..FetchCounts::default()
            },
            100,
        );
        assert_eq!(report.state(), RunState::Complete);
    }

    #[test]
    fn test_state_rerun_with_only_gone_objects_is_not_blocked() {
        let gone = report_with(
            FetchCounts {
                not_found: 1,
                ..FetchCounts::default()
            },
            1,
        );
        assert_eq!(gone.state(), RunState::Complete);

        let rejected = report_with(
            FetchCounts {
                permanent: 2,
                ..FetchCounts::default()
            },
            2,
        );
        assert_eq!(rejected.state(), RunState::Partial);
    }

    #[test]
    fn test_state_partial_with_retryable_failures() {
        let report = report_with(
            FetchCounts {
                stored: 99,
                transient: 1,
                ..FetchCounts::default()
            },
            100,
        );
        assert_eq!(report.state(), RunState::Partial);
    }

    #[test]
    fn test_state_partial_with_skipped_pages() {
        let mut report = report_with(FetchCounts::default(), 0);
        report.skipped_pages = 1;
        assert_eq!(report.state(), RunState::Partial);
    }

    #[test]
    fn test_state_partial_when_crawl_halted() {
        let mut report = report_with(FetchCounts::default(), 0);
        report.crawl = Some(CrawlReport {
            halted: Some("page 4: timeout".to_string()),
            ..CrawlReport::default()
        });
        assert_eq!(report.state(), RunState::Partial);
    }

    #[test]
    fn test_state_blocked_on_error_or_no_progress() {
        let mut errored = report_with(FetchCounts::default(), 0);
        errored.error = Some("listing failed".to_string());
        assert_eq!(errored.state(), RunState::Blocked);

        let starved = report_with(
            FetchCounts {
                transient: 5,
                ..FetchCounts::default()
            },
            5,
        );
        assert_eq!(starved.state(), RunState::Blocked);
    }

    #[test]
    fn test_summary_state_and_totals() {
        let complete = report_with(
            FetchCounts {
                stored: 2,
                ..FetchCounts::default()
            },
            2,
        );
        let mut blocked = report_with(FetchCounts::default(), 0);
        blocked.error = Some("down".to_string());

        let summary = HarvestSummary {
            entities: vec![complete.clone(), blocked.clone()],
            elapsed: Duration::ZERO,
        };
        assert_eq!(summary.state(), RunState::Partial);
        assert_eq!(summary.totals().stored, 2);

        let all_blocked = HarvestSummary {
            entities: vec![blocked],
            elapsed: Duration::ZERO,
        };
        assert_eq!(all_blocked.state(), RunState::Blocked);

        let all_complete = HarvestSummary {
            entities: vec![complete],
            elapsed: Duration::ZERO,
        };
        assert_eq!(all_complete.state(), RunState::Complete);
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Partial.to_string(), "partial");
    }
}
