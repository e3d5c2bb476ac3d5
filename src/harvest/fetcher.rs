//! Object fetcher.
//!
//! Identifiers are dispatched in chunks of `batch_size`. Each chunk gets a
//! slot pool sized by the throttle at the moment it starts and drains fully
//! before the next chunk begins, so concurrency follows server health from
//! chunk to chunk while the per-request delay follows it continuously.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, info, instrument, warn};

use super::HarvestError;
use super::pool::TaskPool;
use super::request::call_with_retry;
use super::stats::{FetchCounts, FetchOutcome, FetchStats};
use crate::checkpoint::{CheckpointStore, ObjectRecord};
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT_OBJECTS, EntitySpec};
use crate::throttle::ThrottleController;
use crate::transport::{ApiRequest, FailureKind, RetryPolicy, Transport, TransportError, classify_error};

/// Fetches and stores individual objects.
#[derive(Clone)]
pub struct ObjectFetcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CheckpointStore>,
    throttle: ThrottleController,
    policy: RetryPolicy,
    base_concurrency: usize,
    batch_size: usize,
    interrupt: Arc<AtomicBool>,
    progress: Option<MultiProgress>,
}

impl std::fmt::Debug for ObjectFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFetcher")
            .field("base_concurrency", &self.base_concurrency)
            .field("batch_size", &self.batch_size)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl ObjectFetcher {
    /// Creates a fetcher with default concurrency and batch size.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CheckpointStore>,
        throttle: ThrottleController,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            throttle,
            policy,
            base_concurrency: DEFAULT_MAX_CONCURRENT_OBJECTS,
            batch_size: DEFAULT_BATCH_SIZE,
            interrupt: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Sets the concurrency used while the server is healthy.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.base_concurrency = concurrency.max(1);
        self
    }

    /// Sets the number of identifiers per chunk.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Shares an interrupt flag; once set, no further identifiers are
    /// dispatched and in-flight ones drain.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Draws a progress bar inside `progress`; without one the bar is hidden.
    #[must_use]
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Fetches every identifier, chunk by chunk.
    ///
    /// Individual failures are counted, never raised.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::PoolClosed`] if a slot pool breaks.
    #[instrument(skip(self, entity, identifiers), fields(entity = %entity.name, outstanding = identifiers.len()))]
    pub async fn fetch_all(
        &self,
        entity: &EntitySpec,
        identifiers: &[String],
    ) -> Result<FetchCounts, HarvestError> {
        let stats = Arc::new(FetchStats::new());
        if identifiers.is_empty() {
            return Ok(stats.snapshot());
        }

        let progress = self.progress_bar(entity, identifiers.len());
        let entity = Arc::new(entity.clone());

        for (chunk_index, chunk) in identifiers.chunks(self.batch_size).enumerate() {
            if self.interrupted() {
                break;
            }

            let concurrency = self.throttle.current_concurrency(self.base_concurrency);
            debug!(
                chunk = chunk_index,
                size = chunk.len(),
                concurrency,
                mode = ?self.throttle.mode(),
                "dispatching chunk"
            );

            let mut pool: TaskPool<FetchOutcome> = TaskPool::new(concurrency);
            for identifier in chunk {
                if self.interrupted() {
                    info!("interrupt received, draining in-flight requests");
                    break;
                }
                let fetcher = self.clone();
                let entity = Arc::clone(&entity);
                let identifier = identifier.clone();
                let task_stats = Arc::clone(&stats);
                pool.spawn(async move {
                    let (outcome, attempts) = fetcher.fetch_one(&entity, &identifier).await;
                    task_stats.add_retries(attempts.saturating_sub(1));
                    outcome
                })
                .await?;

                while let Some(joined) = pool.try_next() {
                    record(&stats, &progress, joined);
                }
            }

            while let Some(joined) = pool.next().await {
                record(&stats, &progress, joined);
            }
        }

        progress.finish_and_clear();
        let counts = stats.snapshot();
        info!(
            stored = counts.stored,
            already_stored = counts.already_stored,
            not_found = counts.not_found,
            invalid = counts.invalid,
            transient = counts.transient,
            permanent = counts.permanent,
            retried = counts.retried,
            "object fetch complete"
        );
        Ok(counts)
    }

    /// Fetches and stores one object.
    ///
    /// Returns the outcome and the number of transport attempts made.
    pub async fn fetch_one(&self, entity: &EntitySpec, identifier: &str) -> (FetchOutcome, u32) {
        match self.store.has_object(&entity.name, identifier).await {
            Ok(true) => return (FetchOutcome::AlreadyStored, 0),
            Ok(false) => {}
            Err(e) => {
                warn!(id = identifier, error = %e, "checkpoint lookup failed");
                return (FetchOutcome::PermanentFailure(e.to_string()), 0);
            }
        }

        let delay = self.throttle.current_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let request = ApiRequest::object(entity.object_entity_name(), identifier);
        match call_with_retry(self.transport.as_ref(), &self.throttle, &self.policy, &request).await
        {
            Ok((payload, attempts)) => {
                let record = ObjectRecord::new(&entity.name, identifier, payload);
                match self.store.put_object(&record).await {
                    Ok(_) => (FetchOutcome::Success(record), attempts),
                    Err(e) => {
                        warn!(id = identifier, error = %e, "failed to store object");
                        (FetchOutcome::PermanentFailure(e.to_string()), attempts)
                    }
                }
            }
            Err((error, attempts)) => {
                let outcome = outcome_for_failure(&error);
                debug!(
                    id = identifier,
                    attempts,
                    outcome = outcome.label(),
                    error = %error,
                    "object fetch failed"
                );
                (outcome, attempts)
            }
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn progress_bar(&self, entity: &EntitySpec, total: usize) -> ProgressBar {
        let Some(multi) = &self.progress else {
            return ProgressBar::hidden();
        };
        let bar = multi.add(ProgressBar::new(total as u64));
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:>12} [{bar:30}] {pos}/{len} ({per_sec}, eta {eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_prefix(entity.name.clone());
        bar
    }
}

fn record(
    stats: &FetchStats,
    progress: &ProgressBar,
    joined: Result<FetchOutcome, tokio::task::JoinError>,
) {
    let outcome = joined.unwrap_or_else(|e| {
        warn!(error = %e, "fetch task panicked");
        FetchOutcome::PermanentFailure(format!("task failed: {e}"))
    });
    stats.record(&outcome);
    progress.inc(1);
    if outcome.is_failure() {
        progress.set_message(format!("last failure: {}", outcome.label()));
    }
}

/// Maps an exhausted transport failure onto a fetch outcome.
fn outcome_for_failure(error: &TransportError) -> FetchOutcome {
    match classify_error(error) {
        FailureKind::Connect | FailureKind::Server => {
            FetchOutcome::TransientFailure(error.to_string())
        }
        FailureKind::Parse => FetchOutcome::Invalid,
        FailureKind::Client => match error.status() {
            Some(401 | 403 | 404 | 410) => FetchOutcome::NotFound,
            _ => FetchOutcome::PermanentFailure(error.to_string()),
        },
        FailureKind::Storage => FetchOutcome::PermanentFailure(error.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;
    use crate::checkpoint::FsCheckpointStore;

    /// Answers object requests from a status table; unknown ids succeed.
    #[derive(Default)]
    struct ScriptedObjects {
        statuses: HashMap<String, u16>,
        calls: Mutex<Vec<(String, String)>>,
        in_flight: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait]
    impl Transport for ScriptedObjects {
        async fn request(&self, request: &ApiRequest) -> Result<Value, TransportError> {
            let entity = request.payload["entity"].as_str().unwrap().to_string();
            let uuid = request.payload["uuid"].as_str().unwrap().to_string();
            self.calls.lock().unwrap().push((entity, uuid.clone()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.statuses.get(&uuid) {
                Some(0) => Err(TransportError::empty_body(&request.path)),
                Some(status) => Err(TransportError::http_status(&request.path, *status)),
                None => Ok(json!({ "id": uuid })),
            }
        }
    }

    fn fetcher(transport: Arc<ScriptedObjects>, dir: &TempDir) -> (ObjectFetcher, ThrottleController) {
        let throttle = ThrottleController::new(Duration::ZERO, 2);
        let fetcher = ObjectFetcher::new(
            transport,
            Arc::new(FsCheckpointStore::new(dir.path())),
            throttle.clone(),
            RetryPolicy::new(3, vec![Duration::ZERO]),
        );
        (fetcher, throttle)
    }

    fn ids(range: std::ops::Range<u32>) -> Vec<String> {
        range.map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_one_not_found_among_hundred() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects {
            statuses: HashMap::from([("42".to_string(), 404)]),
            ..ScriptedObjects::default()
        });
        let (fetcher, _) = fetcher(Arc::clone(&transport), &dir);

        let counts = fetcher
            .with_concurrency(10)
            .fetch_all(&EntitySpec::new("Plan", json!({})), &ids(0..100))
            .await
            .unwrap();

        assert_eq!(counts.stored, 99);
        assert_eq!(counts.not_found, 1);
        assert_eq!(counts.failed(), 1);
        let stored = FsCheckpointStore::new(dir.path())
            .list_object_ids("Plan")
            .await
            .unwrap();
        assert_eq!(stored.len(), 99);
        assert!(!stored.contains("42"));
    }

    #[tokio::test]
    async fn test_uses_object_entity_name_but_stores_under_listing_name() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects::default());
        let (fetcher, _) = fetcher(Arc::clone(&transport), &dir);
        let entity = EntitySpec::new("OrderDetail", json!({})).with_object_entity("ContractTitle");

        let (outcome, attempts) = fetcher.fetch_one(&entity, "0007").await;

        assert!(matches!(outcome, FetchOutcome::Success(_)));
        assert_eq!(attempts, 1);
        assert_eq!(
            transport.calls.lock().unwrap().as_slice(),
            &[("ContractTitle".to_string(), "0007".to_string())]
        );
        assert!(dir.path().join("objects/OrderDetail/0007.json").exists());
    }

    #[tokio::test]
    async fn test_already_stored_makes_no_request() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        store
            .put_object(&ObjectRecord::new("Plan", "5", json!({})))
            .await
            .unwrap();
        let transport = Arc::new(ScriptedObjects::default());
        let (fetcher, _) = fetcher(Arc::clone(&transport), &dir);

        let (outcome, _) = fetcher.fetch_one(&EntitySpec::new("Plan", json!({})), "5").await;
        assert_eq!(outcome, FetchOutcome::AlreadyStored);
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_failures_map_to_outcomes() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects {
            statuses: HashMap::from([
                ("a".to_string(), 503),
                ("b".to_string(), 0),
                ("c".to_string(), 400),
                ("d".to_string(), 403),
            ]),
            ..ScriptedObjects::default()
        });
        let (fetcher, _) = fetcher(Arc::clone(&transport), &dir);
        let entity = EntitySpec::new("Plan", json!({}));

        let (outcome, attempts) = fetcher.fetch_one(&entity, "a").await;
        assert!(matches!(outcome, FetchOutcome::TransientFailure(_)));
        assert_eq!(attempts, 3);

        let (outcome, attempts) = fetcher.fetch_one(&entity, "b").await;
        assert_eq!(outcome, FetchOutcome::Invalid);
        assert_eq!(attempts, 3);

        let (outcome, attempts) = fetcher.fetch_one(&entity, "c").await;
        assert!(matches!(outcome, FetchOutcome::PermanentFailure(_)));
        assert_eq!(attempts, 1);

        let (outcome, _) = fetcher.fetch_one(&entity, "d").await;
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_server_failures_raise_error_state_and_success_resets() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects {
            statuses: HashMap::from([("bad".to_string(), 502)]),
            ..ScriptedObjects::default()
        });
        let (fetcher, throttle) = fetcher(Arc::clone(&transport), &dir);
        let entity = EntitySpec::new("Plan", json!({}));

        fetcher.fetch_one(&entity, "bad").await;
        assert_eq!(throttle.consecutive_failures(), 3);

        fetcher.fetch_one(&entity, "good").await;
        assert_eq!(throttle.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_feed_throttle() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects {
            statuses: HashMap::from([("gone".to_string(), 404)]),
            ..ScriptedObjects::default()
        });
        let (fetcher, throttle) = fetcher(Arc::clone(&transport), &dir);

        fetcher
            .fetch_one(&EntitySpec::new("Plan", json!({})), "gone")
            .await;
        assert_eq!(throttle.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_base() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects::default());
        let (fetcher, _) = fetcher(Arc::clone(&transport), &dir);

        fetcher
            .with_concurrency(4)
            .with_batch_size(7)
            .fetch_all(&EntitySpec::new("Plan", json!({})), &ids(0..30))
            .await
            .unwrap();

        assert!(transport.peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(transport.calls.lock().unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_interrupt_stops_dispatch() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects::default());
        let (fetcher, _) = fetcher(Arc::clone(&transport), &dir);
        let interrupt = Arc::new(AtomicBool::new(true));

        let counts = fetcher
            .with_interrupt(interrupt)
            .fetch_all(&EntitySpec::new("Plan", json!({})), &ids(0..10))
            .await
            .unwrap();

        assert_eq!(counts.total(), 0);
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_fetchers_share_one_progress_display() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedObjects::default());
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let (plans, _) = fetcher(Arc::clone(&transport), &dir);
        let (lots, _) = fetcher(Arc::clone(&transport), &dir);
        let plans = plans.with_progress(multi.clone());
        let lots = lots.with_progress(multi.clone());
        let plan = EntitySpec::new("Plan", json!({}));
        let lot = EntitySpec::new("_Lot", json!({}));

        let plan_ids = ids(0..5);
        let lot_ids = ids(0..3);
        let (a, b) = tokio::join!(
            plans.fetch_all(&plan, &plan_ids),
            lots.fetch_all(&lot, &lot_ids)
        );

        assert_eq!(a.unwrap().stored, 5);
        assert_eq!(b.unwrap().stored, 3);
        assert_eq!(transport.calls.lock().unwrap().len(), 8);
    }

    #[test]
    fn test_outcome_for_failure_statuses() {
        for status in [401, 403, 404, 410] {
            assert_eq!(
                outcome_for_failure(&TransportError::http_status("/p", status)),
                FetchOutcome::NotFound
            );
        }
        assert!(matches!(
            outcome_for_failure(&TransportError::http_status("/p", 422)),
            FetchOutcome::PermanentFailure(_)
        ));
        assert!(matches!(
            outcome_for_failure(&TransportError::timeout("/p")),
            FetchOutcome::TransientFailure(_)
        ));
    }
}
