//! Listing walker.
//!
//! Pages are requested in windows of up to `concurrency` indexes, persisted
//! strictly in index order, and the walk stops at the first empty page.
//! An interrupt is honoured between windows.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::HarvestError;
use super::pool::TaskPool;
use super::request::call_with_retry;
use crate::checkpoint::{CheckpointStore, Page};
use crate::config::{DEFAULT_MAX_CONCURRENT_PAGES, DEFAULT_PAGE_LENGTH, EntitySpec};
use crate::throttle::ThrottleController;
use crate::transport::{ApiRequest, RetryPolicy, Transport, TransportError};

/// Outcome of walking one entity's listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Non-empty pages persisted.
    pub pages: u64,
    /// Items across persisted pages.
    pub records: usize,
    /// Pages fetched but not persisted.
    pub storage_errors: usize,
    /// Why the walk stopped before reaching an empty page, if it did.
    pub halted: Option<String>,
}

impl CrawlReport {
    /// Returns whether the walk reached the terminal empty page.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

type PageResult = (u64, Result<(Vec<Value>, u32), (TransportError, u32)>);

/// Walks a paginated listing and persists each non-empty page.
#[derive(Clone)]
pub struct PageCrawler {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CheckpointStore>,
    throttle: ThrottleController,
    policy: RetryPolicy,
    page_length: u32,
    concurrency: usize,
    interrupt: Arc<AtomicBool>,
}

impl std::fmt::Debug for PageCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCrawler")
            .field("page_length", &self.page_length)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl PageCrawler {
    /// Creates a crawler with the default page length and concurrency.
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
            page_length: DEFAULT_PAGE_LENGTH,
            concurrency: DEFAULT_MAX_CONCURRENT_PAGES,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the number of items requested per page.
    #[must_use]
    pub fn with_page_length(mut self, page_length: u32) -> Self {
        self.page_length = page_length.max(1);
        self
    }

    /// Sets how many pages may be in flight at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Shares an interrupt flag; once set, no further window is requested
    /// and the walk reports itself halted.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Walks the listing of `entity` from page 0.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Listing`] when page 0 cannot be fetched, and
    /// [`HarvestError::Task`] when its task dies. Failures on later pages
    /// halt the walk and are reported in [`CrawlReport::halted`].
    #[instrument(skip(self, entity), fields(entity = %entity.name))]
    pub async fn crawl(&self, entity: &EntitySpec) -> Result<CrawlReport, HarvestError> {
        let mut report = CrawlReport::default();
        let window = self.concurrency as u64;
        let mut start = 0u64;

        info!(page_length = self.page_length, "starting listing walk");

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                info!(next_page = start, pages = report.pages, "listing walk interrupted");
                report.halted = Some("interrupted".to_string());
                return Ok(report);
            }

            let mut fetched = self.fetch_window(entity, start, window).await?;

            for index in start..start + window {
                let result = fetched.remove(&index);
                let items = match result {
                    Some(Ok((items, _attempts))) => items,
                    Some(Err((error, attempts))) => {
                        if index == 0 {
                            return Err(HarvestError::Listing {
                                entity: entity.name.clone(),
                                source: error,
                            });
                        }
                        warn!(page = index, attempts, error = %error, "listing walk halted");
                        report.halted = Some(format!("page {index}: {error}"));
                        return Ok(report);
                    }
                    None => {
                        let reason = format!("page {index} task did not complete");
                        if index == 0 {
                            return Err(HarvestError::Task {
                                entity: entity.name.clone(),
                                reason,
                            });
                        }
                        warn!(page = index, "listing walk halted: task lost");
                        report.halted = Some(reason);
                        return Ok(report);
                    }
                };

                if items.is_empty() {
                    info!(
                        pages = report.pages,
                        records = report.records,
                        storage_errors = report.storage_errors,
                        "listing walk complete"
                    );
                    return Ok(report);
                }

                let count = items.len();
                let page = Page::new(&entity.name, index, items);
                match self.store.put_page(&page).await {
                    Ok(()) => {
                        report.pages += 1;
                        report.records += count;
                        debug!(page = index, items = count, "page persisted");
                    }
                    Err(e) => {
                        report.storage_errors += 1;
                        warn!(page = index, error = %e, "failed to persist page");
                    }
                }
            }

            start += window;
        }
    }

    /// Requests pages `start..start + window` concurrently.
    async fn fetch_window(
        &self,
        entity: &EntitySpec,
        start: u64,
        window: u64,
    ) -> Result<BTreeMap<u64, Result<(Vec<Value>, u32), (TransportError, u32)>>, HarvestError> {
        let mut pool: TaskPool<PageResult> = TaskPool::new(self.concurrency);
        for index in start..start + window {
            let transport = Arc::clone(&self.transport);
            let throttle = self.throttle.clone();
            let policy = self.policy.clone();
            let request =
                ApiRequest::listing(&entity.name, index, self.page_length, &entity.listing_filter);
            pool.spawn(async move {
                let result = call_with_retry(transport.as_ref(), &throttle, &policy, &request)
                    .await
                    .map(|(doc, attempts)| (page_items(&doc), attempts));
                (index, result)
            })
            .await?;
        }

        let mut fetched = BTreeMap::new();
        while let Some(joined) = pool.next().await {
            match joined {
                Ok((index, result)) => {
                    fetched.insert(index, result);
                }
                Err(e) => warn!(error = %e, "listing task failed"),
            }
        }
        Ok(fetched)
    }
}

/// Items of a listing response; absent or non-array `content` is empty.
fn page_items(doc: &Value) -> Vec<Value> {
    doc.get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
