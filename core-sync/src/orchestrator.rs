//! # Sync Orchestrator
//!
//! Drives the three polling operations against one catalog provider.
//!
//! ## Overview
//!
//! | Operation      | Walk                                             | Cursor on success       |
//! |----------------|--------------------------------------------------|-------------------------|
//! | Bulk load      | popularity pages until the target is submitted   | last page number        |
//! | Discovery poll | recently-updated pages newer than the cursor     | completion time (RFC 3339) |
//! | Refresh poll   | up to K stale stored items, one detail fetch each | completion time (RFC 3339) |
//!
//! Bulk load is a no-op once it has completed. Discovery notifies on items
//! stored for the first time; refresh notifies when the chapter count moved.
//!
//! ## Workflow
//!
//! 1. Load the operation's [`SyncState`] and move it to running
//! 2. Fetch pages; extract each record; submit one store task per item to a
//!    fresh [`WorkerPool`] bound to a child token
//! 3. Wait for the pool to drain
//! 4. Persist completed (with the new cursor) or failed (cursor untouched)
//!
//! ## Page Errors
//!
//! - first page fails: the operation fails
//! - later page fails permanently: skipped and logged
//! - later page fails transiently (retries exhausted) or is cancelled: the
//!   operation fails
//! - three consecutive skipped pages: the operation fails
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     provider, items, states, notifier, OrchestratorConfig::from_engine(&config),
//! ));
//! let cancel = CancellationToken::new();
//! tokio::spawn(orchestrator.clone().run(cancel.clone()));
//! ```
//!
//! Two engine instances sharing one store may both run the bulk load; no
//! cross-instance lock is taken.

use crate::repository::SyncStateRepository;
use crate::state::{OperationType, SyncState, SyncStatus};
use crate::worker_pool::{PoolStats, WorkerPool};
use crate::{Result, SyncError};
use anyhow::Context;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, SecondsFormat, Utc};
use core_library::models::{CanonicalItem, UpsertOutcome};
use core_library::repositories::ItemRepository;
use core_metadata::extractor;
use core_metadata::providers::{CatalogPage, CatalogProvider, PageRequest, RawRecord, SortOrder};
use core_metadata::MetadataError;
use core_runtime::config::{ScheduleConfig, SyncEngineConfig};
use core_runtime::notifier::Notifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Consecutive skipped pages after which an operation gives up
pub const MAX_CONSECUTIVE_PAGE_FAILURES: u32 = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Workers per operation run
    pub workers: usize,
    pub schedule: ScheduleConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_engine(config: &SyncEngineConfig) -> Self {
        Self {
            workers: config.workers,
            schedule: config.schedule.clone(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    /// Tick period of an operation
    pub fn interval(&self, operation: OperationType) -> Duration {
        match operation {
            OperationType::BulkLoad => self.schedule.bulk_load_interval,
            OperationType::DiscoveryPoll => self.schedule.discovery_interval,
            OperationType::RefreshPoll => self.schedule.refresh_interval,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What one operation run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub operation: OperationType,
    /// The run was a no-op (bulk load already completed)
    pub skipped: bool,
    pub pages_fetched: u32,
    pub pages_skipped: u32,
    /// Items handed to the worker pool
    pub items_submitted: u64,
    /// Records dropped because extraction failed
    pub items_rejected: u64,
    pub pool: PoolStats,
    /// Cursor persisted on completion
    pub cursor: Option<String>,
}

impl OperationReport {
    fn new(operation: OperationType) -> Self {
        Self {
            operation,
            skipped: false,
            pages_fetched: 0,
            pages_skipped: 0,
            items_submitted: 0,
            items_rejected: 0,
            pool: PoolStats::default(),
            cursor: None,
        }
    }

    fn skipped(operation: OperationType) -> Self {
        Self {
            skipped: true,
            ..Self::new(operation)
        }
    }
}

/// Applies the page error policy across one walk
struct PageFailures {
    operation: OperationType,
    attempted: u32,
    consecutive: u32,
}

impl PageFailures {
    fn new(operation: OperationType) -> Self {
        Self {
            operation,
            attempted: 0,
            consecutive: 0,
        }
    }

    fn record(
        &mut self,
        page: u32,
        result: core_metadata::Result<CatalogPage>,
        report: &mut OperationReport,
    ) -> Result<Option<CatalogPage>> {
        self.attempted += 1;
        let first = self.attempted == 1;

        let error = match result {
            Ok(page) => {
                self.consecutive = 0;
                report.pages_fetched += 1;
                return Ok(Some(page));
            }
            Err(e) => e,
        };

        if first || !error.is_permanent() {
            return Err(error.into());
        }

        self.consecutive += 1;
        report.pages_skipped += 1;
        warn!(
            operation = %self.operation,
            page,
            consecutive = self.consecutive,
            error = %error,
            "Skipping page after permanent failure"
        );

        if self.consecutive >= MAX_CONSECUTIVE_PAGE_FAILURES {
            return Err(SyncError::TooManyPageFailures {
                operation: self.operation.to_string(),
                consecutive: self.consecutive,
            });
        }

        Ok(None)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// State machine driving bulk load, discovery and refresh
pub struct SyncOrchestrator {
    provider: Arc<dyn CatalogProvider>,
    items: Arc<dyn ItemRepository>,
    states: Arc<dyn SyncStateRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl SyncOrchestrator {
    pub fn new(
        provider: Arc<dyn CatalogProvider>,
        items: Arc<dyn ItemRepository>,
        states: Arc<dyn SyncStateRepository>,
        notifier: Arc<dyn Notifier>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::with_clock(provider, items, states, notifier, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn CatalogProvider>,
        items: Arc<dyn ItemRepository>,
        states: Arc<dyn SyncStateRepository>,
        notifier: Arc<dyn Notifier>,
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            items,
            states,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Persisted state of every operation, for operators
    pub async fn status(&self) -> Result<Vec<SyncState>> {
        let mut states = Vec::with_capacity(OperationType::ALL.len());
        for operation in OperationType::ALL {
            states.push(self.states.get(operation).await?);
        }
        Ok(states)
    }

    /// Run the three operations on their intervals until `cancel` fires
    ///
    /// Every operation runs once immediately, then on each tick. A tick
    /// that comes due while its operation is still running is delayed.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(provider = self.provider.name(), "Sync orchestrator started");

        let handles: Vec<_> = OperationType::ALL
            .into_iter()
            .map(|operation| {
                let orchestrator = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { orchestrator.schedule(operation, cancel).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task terminated abnormally");
            }
        }

        info!("Sync orchestrator stopped");
    }

    async fn schedule(&self, operation: OperationType, cancel: CancellationToken) {
        let period = self.config.interval(operation).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(operation = %operation, period_secs = period.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = match operation {
                OperationType::BulkLoad => self.bulk_load(&cancel).await,
                OperationType::DiscoveryPoll => self.discovery_poll(&cancel).await,
                OperationType::RefreshPoll => self.refresh_poll(&cancel).await,
            };

            if let Err(e) = result {
                if e.is_cancelled() {
                    break;
                }
                // Already persisted as failed; the next tick retries.
                debug!(operation = %operation, error = %e, "Run failed");
            }
        }

        debug!(operation = %operation, "Scheduler stopped");
    }

    // ------------------------------------------------------------------------
    // Bulk load
    // ------------------------------------------------------------------------

    /// Seed the store with the most popular items
    ///
    /// No-op if a previous bulk load completed. Seeded items are stored
    /// without `notify_new_item`: only discovery announces new items.
    #[instrument(skip(self, cancel), fields(operation = "bulk-load"))]
    pub async fn bulk_load(&self, cancel: &CancellationToken) -> Result<OperationReport> {
        let state = self.states.get(OperationType::BulkLoad).await?;
        if state.is_completed() {
            debug!("Bulk load already completed");
            return Ok(OperationReport::skipped(OperationType::BulkLoad));
        }

        let state = self.begin(state).await?;
        let pool = WorkerPool::new(self.config.workers, cancel.child_token());
        let mut report = OperationReport::new(OperationType::BulkLoad);

        let walked = self.walk_bulk_load(&pool, cancel, &mut report).await;
        let walked = self.drain(pool, walked, cancel, &mut report).await;

        self.finish(state, walked.map(|last_page| last_page.to_string()), report)
            .await
    }

    async fn walk_bulk_load(
        &self,
        pool: &WorkerPool,
        cancel: &CancellationToken,
        report: &mut OperationReport,
    ) -> Result<u32> {
        let target = u64::from(self.config.schedule.initial_load_target);
        let per_page = self.page_size();
        let mut failures = PageFailures::new(OperationType::BulkLoad);
        let mut last_page = 0;
        let mut page = 1;

        while report.items_submitted < target {
            let request = PageRequest::new(page, per_page, SortOrder::Popularity);
            let result = self.provider.fetch_page(&request, cancel).await;

            if let Some(fetched) = failures.record(page, result, report)? {
                last_page = page;
                let remaining = (target - report.items_submitted) as usize;
                let exhausted = !fetched.has_next_page || fetched.items.is_empty();

                let records: Vec<RawRecord> = fetched.items.into_iter().take(remaining).collect();
                self.submit_records(pool, records, false, report).await?;

                if exhausted {
                    debug!(page, "Provider has no further pages");
                    break;
                }
            }

            page += 1;
        }

        Ok(last_page)
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Pick up items updated since the last successful discovery
    #[instrument(skip(self, cancel), fields(operation = "discovery-poll"))]
    pub async fn discovery_poll(&self, cancel: &CancellationToken) -> Result<OperationReport> {
        let state = self.states.get(OperationType::DiscoveryPoll).await?;
        let since = self.discovery_since(state.cursor.as_deref());

        let state = self.begin(state).await?;
        let pool = WorkerPool::new(self.config.workers, cancel.child_token());
        let mut report = OperationReport::new(OperationType::DiscoveryPoll);

        let walked = self.walk_discovery(&pool, since, cancel, &mut report).await;
        let walked = self.drain(pool, walked, cancel, &mut report).await;

        let cursor = walked.map(|()| format_cursor(self.clock.now()));
        self.finish(state, cursor, report).await
    }

    fn discovery_since(&self, cursor: Option<&str>) -> DateTime<Utc> {
        let fallback = || {
            let lookback = chrono::Duration::from_std(self.config.schedule.discovery_lookback)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
            self.clock.now() - lookback
        };

        match cursor {
            Some(cursor) => match DateTime::parse_from_rfc3339(cursor) {
                Ok(at) => at.with_timezone(&Utc),
                Err(e) => {
                    warn!(cursor, error = %e, "Unreadable discovery cursor, using lookback window");
                    fallback()
                }
            },
            None => fallback(),
        }
    }

    async fn walk_discovery(
        &self,
        pool: &WorkerPool,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut OperationReport,
    ) -> Result<()> {
        let per_page = self.page_size();
        let mut failures = PageFailures::new(OperationType::DiscoveryPoll);
        let mut page = 1;

        debug!(since = %since, "Discovering updated items");

        loop {
            let request =
                PageRequest::new(page, per_page, SortOrder::RecentlyUpdated).updated_since(since);
            let result = self.provider.fetch_page(&request, cancel).await;

            if let Some(fetched) = failures.record(page, result, report)? {
                if fetched.items.is_empty() {
                    break;
                }
                let has_next_page = fetched.has_next_page;
                self.submit_records(pool, fetched.items, true, report).await?;
                if !has_next_page {
                    break;
                }
            }

            page += 1;
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Re-check stale items and report chapter count changes
    #[instrument(skip(self, cancel), fields(operation = "refresh-poll"))]
    pub async fn refresh_poll(&self, cancel: &CancellationToken) -> Result<OperationReport> {
        let state = self.states.get(OperationType::RefreshPoll).await?;
        let state = self.begin(state).await?;
        let pool = WorkerPool::new(self.config.workers, cancel.child_token());
        let mut report = OperationReport::new(OperationType::RefreshPoll);

        let walked = self.walk_refresh(&pool, cancel, &mut report).await;
        let walked = self.drain(pool, walked, cancel, &mut report).await;

        let cursor = walked.map(|()| format_cursor(self.clock.now()));
        self.finish(state, cursor, report).await
    }

    async fn walk_refresh(
        &self,
        pool: &WorkerPool,
        cancel: &CancellationToken,
        report: &mut OperationReport,
    ) -> Result<()> {
        let staleness = chrono::Duration::from_std(self.config.schedule.refresh_staleness)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = self.clock.now() - staleness;

        let stale = self
            .items
            .find_stale(cutoff, self.config.schedule.refresh_batch_limit)
            .await?;

        debug!(stale = stale.len(), cutoff = %cutoff, "Refreshing stale items");

        for stored in stale {
            let task = RefreshTask {
                provider: self.provider.clone(),
                items: self.items.clone(),
                notifier: self.notifier.clone(),
                clock: self.clock.clone(),
                cancel: cancel.clone(),
            };
            pool.submit(task.run(stored)).await?;
            report.items_submitted += 1;
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------------

    fn page_size(&self) -> u32 {
        self.config
            .schedule
            .page_size
            .clamp(1, self.provider.max_page_size().max(1))
    }

    async fn begin(&self, state: SyncState) -> Result<SyncState> {
        if state.status == SyncStatus::Running {
            warn!(
                operation = %state.operation,
                last_run_at = ?state.last_run_at,
                "Previous run was interrupted, starting over"
            );
        }

        let state = state.start(self.clock.now())?;
        self.states.put(&state).await?;
        info!(operation = %state.operation, cursor = ?state.cursor, "Operation started");
        Ok(state)
    }

    /// Let submitted work finish; on cancellation drop what is still queued
    ///
    /// A walk that succeeded still fails here if cancellation fired while the
    /// pool drained or any task was dropped, so the cursor never moves past
    /// unstored items.
    async fn drain<T>(
        &self,
        pool: WorkerPool,
        walked: Result<T>,
        cancel: &CancellationToken,
        report: &mut OperationReport,
    ) -> Result<T> {
        report.pool = match &walked {
            Err(e) if e.is_cancelled() => pool.shutdown().await,
            _ => pool.wait().await,
        };

        match walked {
            Ok(_) if cancel.is_cancelled() || report.pool.dropped > 0 => {
                warn!(
                    operation = %report.operation,
                    completed = report.pool.completed,
                    dropped = report.pool.dropped,
                    "Cancelled before submitted items were stored"
                );
                Err(SyncError::Cancelled)
            }
            walked => walked,
        }
    }

    async fn finish(
        &self,
        state: SyncState,
        outcome: Result<String>,
        mut report: OperationReport,
    ) -> Result<OperationReport> {
        match outcome {
            Ok(cursor) => {
                let state = state.complete(self.clock.now(), Some(cursor.clone()))?;
                self.states.put(&state).await?;
                report.cursor = Some(cursor);

                info!(
                    operation = %report.operation,
                    pages = report.pages_fetched,
                    pages_skipped = report.pages_skipped,
                    submitted = report.items_submitted,
                    rejected = report.items_rejected,
                    completed = report.pool.completed,
                    failed = report.pool.failed,
                    cursor = ?report.cursor,
                    "Operation completed"
                );
                Ok(report)
            }
            Err(e) => {
                let operation = state.operation;
                let state = state.fail(e.to_string())?;
                if let Err(persist) = self.states.put(&state).await {
                    error!(operation = %operation, error = %persist, "Failed to persist failed state");
                }

                error!(
                    operation = %operation,
                    pages = report.pages_fetched,
                    submitted = report.items_submitted,
                    error = %e,
                    "Operation failed"
                );
                Err(e)
            }
        }
    }

    async fn submit_records(
        &self,
        pool: &WorkerPool,
        records: Vec<RawRecord>,
        notify_new: bool,
        report: &mut OperationReport,
    ) -> Result<()> {
        let synced_at = self.clock.now();

        for raw in records {
            let item = match extractor::extract(&raw, synced_at) {
                Ok(item) => item,
                Err(e) => {
                    report.items_rejected += 1;
                    warn!(external_id = %raw.external_id, error = %e, "Skipping unusable record");
                    continue;
                }
            };

            pool.submit(store_item(
                self.items.clone(),
                self.notifier.clone(),
                item,
                notify_new,
            ))
            .await?;
            report.items_submitted += 1;
        }

        Ok(())
    }
}

fn format_cursor(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_chapters(chapters: Option<u32>) -> String {
    chapters.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Store one extracted item, announcing it if it is new
async fn store_item(
    items: Arc<dyn ItemRepository>,
    notifier: Arc<dyn Notifier>,
    item: CanonicalItem,
    notify_new: bool,
) -> anyhow::Result<()> {
    let outcome = items
        .upsert(&item)
        .await
        .with_context(|| format!("storing {}", item.external_id))?;

    if notify_new && outcome == UpsertOutcome::Inserted {
        notifier.notify_new_item(&item.external_id, &item.title);
    }

    Ok(())
}

/// Everything one refresh check needs, owned by the pool task
struct RefreshTask {
    provider: Arc<dyn CatalogProvider>,
    items: Arc<dyn ItemRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl RefreshTask {
    async fn run(self, stored: CanonicalItem) -> anyhow::Result<()> {
        let now = self.clock.now();
        let external_id = stored.external_id.as_str();

        let raw = match self.provider.fetch_item(external_id, &self.cancel).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!(external_id, "Item no longer returned by provider");
                return self.stamp(external_id, now).await;
            }
            Err(e) if e.is_permanent() => {
                warn!(external_id, error = %e, "Permanent failure refreshing item");
                return self.stamp(external_id, now).await;
            }
            Err(e) => return Err(refresh_error(external_id, e)),
        };

        let mut fresh = match extractor::extract(&raw, now) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(external_id, error = %e, "Refreshed record unusable");
                return self.stamp(external_id, now).await;
            }
        };

        if fresh.chapters == stored.chapters {
            return self.stamp(external_id, now).await;
        }

        fresh.last_refresh_check_at = Some(now);
        self.items
            .upsert(&fresh)
            .await
            .with_context(|| format!("storing refreshed {}", external_id))?;

        let old_value = format_chapters(stored.chapters);
        let new_value = format_chapters(fresh.chapters);
        info!(
            external_id,
            old = %old_value,
            new = %new_value,
            "Chapter count changed"
        );
        self.notifier
            .notify_field_change(&fresh.external_id, &fresh.title, &old_value, &new_value);

        Ok(())
    }

    async fn stamp(&self, external_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.items
            .mark_refresh_checked(external_id, at)
            .await
            .with_context(|| format!("stamping {}", external_id))
    }
}

fn refresh_error(external_id: &str, error: MetadataError) -> anyhow::Error {
    anyhow::Error::new(error).context(format!("refreshing {}", external_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(items: usize) -> CatalogPage {
        CatalogPage {
            items: (0..items)
                .map(|i| RawRecord {
                    external_id: format!("anilist:{}", i),
                    title_english: Some(format!("Title {}", i)),
                    ..Default::default()
                })
                .collect(),
            page: 1,
            has_next_page: true,
        }
    }

    fn permanent() -> MetadataError {
        MetadataError::PermanentApi {
            status: Some(400),
            message: "bad page".to_string(),
        }
    }

    fn transient() -> MetadataError {
        MetadataError::Transient {
            message: "HTTP 503".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_first_page_failure_is_fatal() {
        let mut failures = PageFailures::new(OperationType::BulkLoad);
        let mut report = OperationReport::new(OperationType::BulkLoad);

        let result = failures.record(1, Err(permanent()), &mut report);
        assert!(matches!(result, Err(SyncError::Metadata(_))));
    }

    #[test]
    fn test_later_permanent_failure_is_skipped() {
        let mut failures = PageFailures::new(OperationType::DiscoveryPoll);
        let mut report = OperationReport::new(OperationType::DiscoveryPoll);

        assert!(failures.record(1, Ok(page(2)), &mut report).unwrap().is_some());
        assert!(failures.record(2, Err(permanent()), &mut report).unwrap().is_none());
        assert!(failures.record(3, Ok(page(1)), &mut report).unwrap().is_some());
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.pages_skipped, 1);
    }

    #[test]
    fn test_later_transient_failure_is_fatal() {
        let mut failures = PageFailures::new(OperationType::BulkLoad);
        let mut report = OperationReport::new(OperationType::BulkLoad);

        failures.record(1, Ok(page(2)), &mut report).unwrap();
        assert!(failures.record(2, Err(transient()), &mut report).is_err());
    }

    #[test]
    fn test_cancellation_is_fatal_and_recognised() {
        let mut failures = PageFailures::new(OperationType::BulkLoad);
        let mut report = OperationReport::new(OperationType::BulkLoad);

        failures.record(1, Ok(page(2)), &mut report).unwrap();
        let err = failures
            .record(2, Err(MetadataError::Cancelled), &mut report)
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_consecutive_skips_give_up() {
        let mut failures = PageFailures::new(OperationType::BulkLoad);
        let mut report = OperationReport::new(OperationType::BulkLoad);

        failures.record(1, Ok(page(2)), &mut report).unwrap();
        assert!(failures.record(2, Err(permanent()), &mut report).is_ok());
        assert!(failures.record(3, Err(permanent()), &mut report).is_ok());
        assert!(matches!(
            failures.record(4, Err(permanent()), &mut report),
            Err(SyncError::TooManyPageFailures { consecutive: 3, .. })
        ));
    }

    #[test]
    fn test_interval_per_operation() {
        let config = OrchestratorConfig::default();
        assert_eq!(
            config.interval(OperationType::DiscoveryPoll),
            Duration::from_secs(15 * 60)
        );
        assert_eq!(
            config.interval(OperationType::BulkLoad),
            Duration::from_secs(60 * 60)
        );
    }

    #[test]
    fn test_format_helpers() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(format_cursor(at), "2023-11-14T22:13:20Z");
        assert_eq!(format_chapters(Some(12)), "12");
        assert_eq!(format_chapters(None), "unknown");
    }
}
