//! Orchestrator operations against an in-memory store and mocked provider

use async_trait::async_trait;
use bridge_traits::time::ManualClock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_library::models::{CanonicalItem, ItemStatus, UpsertOutcome};
use core_library::repositories::{ItemRepository, SqliteItemRepository};
use core_library::{create_pool, create_test_pool, DatabaseConfig, Result as LibraryResult};
use core_metadata::providers::{CatalogPage, CatalogProvider, PageRequest, RawRecord, SortOrder};
use core_metadata::{MetadataError, Result as MetadataResult};
use core_runtime::config::ScheduleConfig;
use core_runtime::notifier::{NoopNotifier, Notifier};
use core_sync::{
    OperationType, OrchestratorConfig, Result as SyncResult, SqliteSyncStateRepository, SyncError,
    SyncOrchestrator, SyncState, SyncStateRepository, SyncStatus,
};
use mockall::mock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mock! {
    Provider {}

    #[async_trait]
    impl CatalogProvider for Provider {
        fn name(&self) -> &'static str;
        fn max_page_size(&self) -> u32;
        async fn fetch_page(
            &self,
            request: &PageRequest,
            cancel: &CancellationToken,
        ) -> MetadataResult<CatalogPage>;
        async fn fetch_item(
            &self,
            external_id: &str,
            cancel: &CancellationToken,
        ) -> MetadataResult<Option<RawRecord>>;
    }
}

mock! {
    Notifier {}

    impl Notifier for Notifier {
        fn notify_new_item(&self, id: &str, title: &str);
        fn notify_field_change(&self, id: &str, title: &str, old_value: &str, new_value: &str);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    items: Arc<SqliteItemRepository>,
    states: Arc<SqliteSyncStateRepository>,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn new() -> Self {
        let pool = create_test_pool().await.unwrap();
        Self {
            items: Arc::new(SqliteItemRepository::new(pool.clone())),
            states: Arc::new(SqliteSyncStateRepository::new(pool)),
            clock: Arc::new(ManualClock::new(start_time())),
        }
    }

    fn orchestrator(
        &self,
        provider: MockProvider,
        notifier: Arc<dyn Notifier>,
        schedule: ScheduleConfig,
    ) -> SyncOrchestrator {
        SyncOrchestrator::with_clock(
            Arc::new(provider),
            self.items.clone(),
            self.states.clone(),
            notifier,
            OrchestratorConfig::default()
                .with_workers(2)
                .with_schedule(schedule),
            self.clock.clone(),
        )
    }
}

fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn schedule(target: u32, page_size: u32) -> ScheduleConfig {
    ScheduleConfig {
        initial_load_target: target,
        page_size,
        ..ScheduleConfig::default()
    }
}

fn record(id: u32, chapters: Option<u32>, status: &str) -> RawRecord {
    RawRecord {
        external_id: format!("anilist:{}", id),
        title_english: Some(format!("Series {}", id)),
        status: Some(status.to_string()),
        chapters,
        ..Default::default()
    }
}

fn page_of(page: u32, ids: std::ops::Range<u32>, has_next_page: bool) -> CatalogPage {
    CatalogPage {
        items: ids.map(|id| record(id, Some(id * 10), "RELEASING")).collect(),
        page,
        has_next_page,
    }
}

fn mock_provider() -> MockProvider {
    let mut provider = MockProvider::new();
    provider.expect_name().return_const("anilist");
    provider.expect_max_page_size().return_const(50u32);
    provider
}

fn permanent(message: &str) -> MetadataError {
    MetadataError::PermanentApi {
        status: Some(400),
        message: message.to_string(),
    }
}

fn silent() -> Arc<dyn Notifier> {
    let mut notifier = MockNotifier::new();
    notifier.expect_notify_new_item().never();
    notifier.expect_notify_field_change().never();
    Arc::new(notifier)
}

type Calls = Arc<Mutex<Vec<Vec<String>>>>;

/// Notifier that records every new-item call
fn recording_new_items() -> (Arc<dyn Notifier>, Calls) {
    let calls = Calls::default();
    let mut notifier = MockNotifier::new();
    let recorded = calls.clone();
    notifier.expect_notify_new_item().returning(move |id, title| {
        recorded
            .lock()
            .unwrap()
            .push(vec![id.to_string(), title.to_string()]);
    });
    notifier.expect_notify_field_change().never();
    (Arc::new(notifier), calls)
}

/// Notifier that records every field-change call
fn recording_changes() -> (Arc<dyn Notifier>, Calls) {
    let calls = Calls::default();
    let mut notifier = MockNotifier::new();
    let recorded = calls.clone();
    notifier.expect_notify_new_item().never();
    notifier
        .expect_notify_field_change()
        .returning(move |id, title, old, new| {
            recorded.lock().unwrap().push(vec![
                id.to_string(),
                title.to_string(),
                old.to_string(),
                new.to_string(),
            ]);
        });
    (Arc::new(notifier), calls)
}

fn stored(id: u32, chapters: Option<u32>) -> CanonicalItem {
    CanonicalItem {
        external_id: format!("anilist:{}", id),
        title: format!("Series {}", id),
        slug: format!("series-{}", id),
        status: ItemStatus::Ongoing,
        chapters,
        description: String::new(),
        cover_url: None,
        rating: None,
        author: String::new(),
        genres: Vec::new(),
        last_synced_at: start_time(),
        last_refresh_check_at: None,
    }
}

/// Item store that takes `delay` before every upsert
struct SlowItems {
    inner: SqliteItemRepository,
    delay: Duration,
}

#[async_trait]
impl ItemRepository for SlowItems {
    async fn upsert(&self, item: &CanonicalItem) -> LibraryResult<UpsertOutcome> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(item).await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> LibraryResult<Option<CanonicalItem>> {
        self.inner.find_by_external_id(external_id).await
    }

    async fn find_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> LibraryResult<Vec<CanonicalItem>> {
        self.inner.find_stale(cutoff, limit).await
    }

    async fn mark_refresh_checked(
        &self,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> LibraryResult<()> {
        self.inner.mark_refresh_checked(external_id, at).await
    }

    async fn count(&self) -> LibraryResult<i64> {
        self.inner.count().await
    }
}

type Transition = (OperationType, SyncStatus, Option<String>);

/// State store that remembers every persisted transition
struct RecordingStates {
    inner: SqliteSyncStateRepository,
    puts: Mutex<Vec<Transition>>,
}

impl RecordingStates {
    fn of(&self, operation: OperationType) -> Vec<(SyncStatus, Option<String>)> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _, _)| *op == operation)
            .map(|(_, status, cursor)| (*status, cursor.clone()))
            .collect()
    }
}

#[async_trait]
impl SyncStateRepository for RecordingStates {
    async fn get(&self, operation: OperationType) -> SyncResult<SyncState> {
        self.inner.get(operation).await
    }

    async fn put(&self, state: &SyncState) -> SyncResult<()> {
        self.puts
            .lock()
            .unwrap()
            .push((state.operation, state.status, state.cursor.clone()));
        self.inner.put(state).await
    }

    async fn list(&self) -> SyncResult<Vec<SyncState>> {
        self.inner.list().await
    }
}

fn temp_database() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("catalog-sync-{}.db", uuid::Uuid::new_v4()))
}

fn remove_database(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

// ============================================================================
// Bulk Load
// ============================================================================

#[tokio::test]
async fn test_bulk_load_stops_at_target() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider
        .expect_fetch_page()
        .times(2)
        .returning(|request, _| {
            assert_eq!(request.sort, SortOrder::Popularity);
            assert_eq!(request.per_page, 2);
            assert!(request.updated_since.is_none());
            let first = (request.page - 1) * 2 + 1;
            Ok(page_of(request.page, first..first + 2, true))
        });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(3, 2));
    let report = orchestrator.bulk_load(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.items_submitted, 3);
    assert_eq!(report.pool.completed, 3);
    assert_eq!(harness.items.count().await.unwrap(), 3);
    assert!(harness.items.find_by_external_id("anilist:4").await.unwrap().is_none());

    let state = harness.states.get(OperationType::BulkLoad).await.unwrap();
    assert_eq!(state.status, SyncStatus::Completed);
    assert_eq!(state.cursor.as_deref(), Some("2"));
    assert_eq!(state.last_success_at, Some(start_time()));
}

#[tokio::test]
async fn test_completed_bulk_load_is_a_noop() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider
        .expect_fetch_page()
        .times(1)
        .returning(|request, _| Ok(page_of(request.page, 1..3, false)));

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 2));
    let cancel = CancellationToken::new();

    let first = orchestrator.bulk_load(&cancel).await.unwrap();
    assert!(!first.skipped);

    let second = orchestrator.bulk_load(&cancel).await.unwrap();
    assert!(second.skipped);
    assert_eq!(harness.items.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_repeated_bulk_load_does_not_duplicate() {
    let harness = Harness::new().await;

    let runs = Arc::new(AtomicU32::new(0));
    let mut provider = mock_provider();
    let counter = runs.clone();
    provider.expect_fetch_page().times(2).returning(move |request, _| {
        let mut page = page_of(request.page, 1..4, false);
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            for item in &mut page.items {
                item.chapters = Some(99);
            }
        }
        Ok(page)
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 5));
    let cancel = CancellationToken::new();

    orchestrator.bulk_load(&cancel).await.unwrap();
    harness
        .states
        .put(&SyncState::new(OperationType::BulkLoad))
        .await
        .unwrap();
    orchestrator.bulk_load(&cancel).await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(harness.items.count().await.unwrap(), 3);
    for id in ["anilist:1", "anilist:2", "anilist:3"] {
        let item = harness.items.find_by_external_id(id).await.unwrap().unwrap();
        assert_eq!(item.chapters, Some(99));
    }
}

#[tokio::test]
async fn test_bulk_load_maps_unknown_status_to_ongoing() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider.expect_fetch_page().times(1).returning(|request, _| {
        Ok(CatalogPage {
            items: vec![
                record(1, None, "RELEASING"),
                record(2, None, "SOMETHING_NEW"),
                record(3, Some(40), "FINISHED"),
            ],
            page: request.page,
            has_next_page: false,
        })
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 5));
    orchestrator.bulk_load(&CancellationToken::new()).await.unwrap();

    let status = |id: &'static str| {
        let items = harness.items.clone();
        async move { items.find_by_external_id(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status("anilist:1").await, ItemStatus::Ongoing);
    assert_eq!(status("anilist:2").await, ItemStatus::Ongoing);
    assert_eq!(status("anilist:3").await, ItemStatus::Completed);
}

#[tokio::test]
async fn test_unusable_records_do_not_count_toward_target() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider.expect_fetch_page().times(2).returning(|request, _| {
        let page = if request.page == 1 {
            CatalogPage {
                items: vec![
                    record(1, None, "RELEASING"),
                    RawRecord {
                        external_id: "anilist:2".to_string(),
                        ..Default::default()
                    },
                ],
                page: 1,
                has_next_page: true,
            }
        } else {
            page_of(2, 3..5, true)
        };
        Ok(page)
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(2, 2));
    let report = orchestrator.bulk_load(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.items_rejected, 1);
    assert_eq!(report.items_submitted, 2);
    assert_eq!(harness.items.count().await.unwrap(), 2);
}

// ============================================================================
// Page Error Policy
// ============================================================================

#[tokio::test]
async fn test_first_page_failure_fails_operation() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider
        .expect_fetch_page()
        .times(1)
        .returning(|_, _| Err(permanent("invalid sort")));

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 2));
    let err = orchestrator
        .bulk_load(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Metadata(MetadataError::PermanentApi { .. })));

    let state = harness.states.get(OperationType::BulkLoad).await.unwrap();
    assert_eq!(state.status, SyncStatus::Failed);
    assert!(state.last_error.unwrap().contains("invalid sort"));
    assert!(state.cursor.is_none());
}

#[tokio::test]
async fn test_later_permanent_page_failure_is_skipped() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider.expect_fetch_page().times(3).returning(|request, _| match request.page {
        1 => Ok(page_of(1, 1..3, true)),
        2 => Err(permanent("page unavailable")),
        _ => Ok(page_of(3, 5..7, false)),
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 2));
    let report = orchestrator.bulk_load(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.pages_skipped, 1);
    assert_eq!(report.cursor.as_deref(), Some("3"));
    assert_eq!(harness.items.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_consecutive_page_failures_fail_operation() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider.expect_fetch_page().times(4).returning(|request, _| {
        if request.page == 1 {
            Ok(page_of(1, 1..3, true))
        } else {
            Err(permanent("page unavailable"))
        }
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 2));
    let err = orchestrator
        .bulk_load(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::TooManyPageFailures { consecutive: 3, .. }
    ));

    // Items from the good page are kept
    assert_eq!(harness.items.count().await.unwrap(), 2);
    let state = harness.states.get(OperationType::BulkLoad).await.unwrap();
    assert_eq!(state.status, SyncStatus::Failed);
}

#[tokio::test]
async fn test_cancelled_operation_is_marked_failed() {
    let harness = Harness::new().await;
    let cancel = CancellationToken::new();

    let mut provider = mock_provider();
    let trigger = cancel.clone();
    provider.expect_fetch_page().returning(move |request, _| {
        if request.page == 1 {
            Ok(page_of(1, 1..3, true))
        } else {
            trigger.cancel();
            Err(MetadataError::Cancelled)
        }
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 2));
    let err = orchestrator.bulk_load(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());

    let state = harness.states.get(OperationType::BulkLoad).await.unwrap();
    assert_eq!(state.status, SyncStatus::Failed);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_notifies_only_new_items() {
    let harness = Harness::new().await;
    harness.items.upsert(&stored(1, Some(10))).await.unwrap();

    let expected_since = start_time() - ChronoDuration::hours(24);
    let mut provider = mock_provider();
    provider.expect_fetch_page().times(1).returning(move |request, _| {
        assert_eq!(request.sort, SortOrder::RecentlyUpdated);
        assert_eq!(request.updated_since, Some(expected_since));
        Ok(page_of(1, 1..3, false))
    });

    let (notifier, calls) = recording_new_items();
    let orchestrator = harness.orchestrator(provider, notifier, schedule(10, 20));
    let report = orchestrator
        .discovery_poll(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.items_submitted, 2);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![vec!["anilist:2".to_string(), "Series 2".to_string()]]
    );
    let state = harness.states.get(OperationType::DiscoveryPoll).await.unwrap();
    assert_eq!(state.status, SyncStatus::Completed);
    assert_eq!(state.cursor.as_deref(), Some("2023-11-14T22:13:20Z"));
}

#[tokio::test]
async fn test_discovery_resumes_from_cursor() {
    let harness = Harness::new().await;

    let state = SyncState::new(OperationType::DiscoveryPoll)
        .start(start_time())
        .unwrap()
        .complete(start_time(), Some("2023-11-14T20:00:00Z".to_string()))
        .unwrap();
    harness.states.put(&state).await.unwrap();

    let expected_since = DateTime::parse_from_rfc3339("2023-11-14T20:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let mut provider = mock_provider();
    provider.expect_fetch_page().times(1).returning(move |request, _| {
        assert_eq!(request.updated_since, Some(expected_since));
        Ok(CatalogPage::default())
    });

    harness.clock.advance(ChronoDuration::minutes(15));
    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 20));
    orchestrator
        .discovery_poll(&CancellationToken::new())
        .await
        .unwrap();

    let state = harness.states.get(OperationType::DiscoveryPoll).await.unwrap();
    assert_eq!(state.cursor.as_deref(), Some("2023-11-14T22:28:20Z"));
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_reports_chapter_change() {
    let harness = Harness::new().await;
    harness.items.upsert(&stored(1, Some(10))).await.unwrap();

    let mut provider = mock_provider();
    provider.expect_fetch_item().times(1).returning(|id, _| {
        assert_eq!(id, "anilist:1");
        Ok(Some(record(1, Some(12), "RELEASING")))
    });

    let (notifier, calls) = recording_changes();
    let orchestrator = harness.orchestrator(provider, notifier, schedule(10, 20));
    let report = orchestrator
        .refresh_poll(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.pool.completed, 1);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![vec![
            "anilist:1".to_string(),
            "Series 1".to_string(),
            "10".to_string(),
            "12".to_string(),
        ]]
    );

    let item = harness
        .items
        .find_by_external_id("anilist:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.chapters, Some(12));
    assert_eq!(item.last_refresh_check_at, Some(start_time()));
}

#[tokio::test]
async fn test_refresh_without_change_only_stamps() {
    let harness = Harness::new().await;
    harness.items.upsert(&stored(1, Some(10))).await.unwrap();

    let mut provider = mock_provider();
    provider
        .expect_fetch_item()
        .times(1)
        .returning(|_, _| Ok(Some(record(1, Some(10), "RELEASING"))));

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 20));
    orchestrator
        .refresh_poll(&CancellationToken::new())
        .await
        .unwrap();

    let item = harness
        .items
        .find_by_external_id("anilist:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.last_refresh_check_at, Some(start_time()));

    // Freshly checked items are not picked up again
    let mut idle = mock_provider();
    idle.expect_fetch_item().never();
    let orchestrator = harness.orchestrator(idle, silent(), schedule(10, 20));
    let report = orchestrator
        .refresh_poll(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.items_submitted, 0);
}

#[tokio::test]
async fn test_refresh_stamps_items_gone_from_provider() {
    let harness = Harness::new().await;
    harness.items.upsert(&stored(1, Some(10))).await.unwrap();
    harness.items.upsert(&stored(2, None)).await.unwrap();

    let mut provider = mock_provider();
    provider.expect_fetch_item().times(2).returning(|id, _| {
        if id == "anilist:1" {
            Ok(None)
        } else {
            Err(permanent("removed"))
        }
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 20));
    let report = orchestrator
        .refresh_poll(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.pool.completed, 2);

    for id in ["anilist:1", "anilist:2"] {
        let item = harness.items.find_by_external_id(id).await.unwrap().unwrap();
        assert_eq!(item.last_refresh_check_at, Some(start_time()));
    }
}

#[tokio::test]
async fn test_refresh_transient_failure_leaves_item_stale() {
    let harness = Harness::new().await;
    harness.items.upsert(&stored(1, Some(10))).await.unwrap();

    let mut provider = mock_provider();
    provider.expect_fetch_item().times(1).returning(|_, _| {
        Err(MetadataError::Transient {
            message: "HTTP 503".to_string(),
            retry_after: None,
        })
    });

    let orchestrator = harness.orchestrator(provider, silent(), schedule(10, 20));
    let report = orchestrator
        .refresh_poll(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.pool.failed, 1);

    let item = harness
        .items
        .find_by_external_id("anilist:1")
        .await
        .unwrap()
        .unwrap();
    assert!(item.last_refresh_check_at.is_none());
}

#[tokio::test]
async fn test_refresh_respects_batch_limit() {
    let harness = Harness::new().await;
    for id in 1..=4 {
        harness.items.upsert(&stored(id, Some(id))).await.unwrap();
    }

    let mut provider = mock_provider();
    provider
        .expect_fetch_item()
        .times(2)
        .returning(|id, _| {
            let n: u32 = id.trim_start_matches("anilist:").parse().unwrap();
            Ok(Some(record(n, Some(n), "RELEASING")))
        });

    let schedule = ScheduleConfig {
        refresh_batch_limit: 2,
        ..schedule(10, 20)
    };
    let orchestrator = harness.orchestrator(provider, silent(), schedule);
    let report = orchestrator
        .refresh_poll(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.items_submitted, 2);
}

// ============================================================================
// Cancellation & Concurrency
// ============================================================================

#[tokio::test]
async fn test_cancel_while_draining_keeps_bulk_load_pending() {
    let pool = create_test_pool().await.unwrap();
    let store = SqliteItemRepository::new(pool.clone());
    let items = Arc::new(SlowItems {
        inner: SqliteItemRepository::new(pool.clone()),
        delay: Duration::from_millis(100),
    });
    let states = Arc::new(SqliteSyncStateRepository::new(pool));
    let cancel = CancellationToken::new();

    // The walk itself succeeds; cancellation lands while the single worker
    // is still storing the first of three items.
    let mut provider = mock_provider();
    let trigger = cancel.clone();
    provider.expect_fetch_page().times(1).returning(move |request, _| {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        Ok(page_of(request.page, 1..4, false))
    });

    let orchestrator = SyncOrchestrator::with_clock(
        Arc::new(provider),
        items,
        states.clone(),
        silent(),
        OrchestratorConfig::default()
            .with_workers(1)
            .with_schedule(schedule(10, 5)),
        Arc::new(ManualClock::new(start_time())),
    );

    let err = orchestrator.bulk_load(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());

    let state = states.get(OperationType::BulkLoad).await.unwrap();
    assert_eq!(state.status, SyncStatus::Failed);
    assert!(state.cursor.is_none());
    assert!(store.count().await.unwrap() < 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_load_against_file_database() {
    let path = temp_database();
    let pool = create_pool(DatabaseConfig::new(path.display().to_string()))
        .await
        .unwrap();
    let items = Arc::new(SqliteItemRepository::new(pool.clone()));
    let states = Arc::new(SqliteSyncStateRepository::new(pool.clone()));

    let mut provider = mock_provider();
    provider.expect_fetch_page().times(3).returning(|request, _| {
        let first = (request.page - 1) * 20 + 1;
        Ok(page_of(request.page, first..first + 20, true))
    });

    let orchestrator = SyncOrchestrator::with_clock(
        Arc::new(provider),
        items.clone(),
        states.clone(),
        silent(),
        OrchestratorConfig::default()
            .with_workers(4)
            .with_schedule(schedule(60, 20)),
        Arc::new(ManualClock::new(start_time())),
    );

    let report = orchestrator.bulk_load(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.pool.completed, 60);
    assert_eq!(report.pool.failed, 0);
    assert_eq!(items.count().await.unwrap(), 60);

    let state = states.get(OperationType::BulkLoad).await.unwrap();
    assert_eq!(state.status, SyncStatus::Completed);
    assert_eq!(state.cursor.as_deref(), Some("3"));

    pool.close().await;
    remove_database(&path);
}

// ============================================================================
// Status & Scheduling
// ============================================================================

#[tokio::test]
async fn test_status_lists_every_operation() {
    let harness = Harness::new().await;
    let orchestrator = harness.orchestrator(mock_provider(), silent(), schedule(10, 20));

    let states = orchestrator.status().await.unwrap();
    let operations: Vec<_> = states.iter().map(|s| s.operation).collect();
    assert_eq!(operations, OperationType::ALL.to_vec());
    assert!(states.iter().all(|s| s.status == SyncStatus::NotStarted));
}

#[tokio::test]
async fn test_run_executes_each_operation_and_stops_on_cancel() {
    let harness = Harness::new().await;

    let mut provider = mock_provider();
    provider
        .expect_fetch_page()
        .returning(|request, _| Ok(page_of(request.page, 1..3, false)));
    provider.expect_fetch_item().returning(|_, _| Ok(None));

    let orchestrator = Arc::new(harness.orchestrator(
        provider,
        Arc::new(NoopNotifier),
        schedule(10, 20),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(orchestrator.clone().run(cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let states = orchestrator.status().await.unwrap();
        if states.iter().all(|s| s.status == SyncStatus::Completed) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "operations did not complete");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();
}

#[tokio::test]
async fn test_failed_run_recovers_on_next_tick() {
    let pool = create_test_pool().await.unwrap();
    let states = Arc::new(RecordingStates {
        inner: SqliteSyncStateRepository::new(pool.clone()),
        puts: Mutex::new(Vec::new()),
    });

    let bulk_calls = Arc::new(AtomicU32::new(0));
    let counter = bulk_calls.clone();
    let mut provider = mock_provider();
    provider.expect_fetch_page().returning(move |request, _| {
        if request.sort != SortOrder::Popularity {
            return Ok(CatalogPage::default());
        }
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(MetadataError::Transient {
                message: "HTTP 503".to_string(),
                retry_after: None,
            });
        }
        Ok(page_of(request.page, 1..3, false))
    });
    provider.expect_fetch_item().returning(|_, _| Ok(None));

    let schedule = ScheduleConfig {
        bulk_load_interval: Duration::from_millis(50),
        ..schedule(10, 5)
    };
    let orchestrator = Arc::new(SyncOrchestrator::with_clock(
        Arc::new(provider),
        Arc::new(SqliteItemRepository::new(pool)),
        states.clone(),
        Arc::new(NoopNotifier),
        OrchestratorConfig::default()
            .with_workers(2)
            .with_schedule(schedule),
        Arc::new(ManualClock::new(start_time())),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(orchestrator.clone().run(cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let state = states.get(OperationType::BulkLoad).await.unwrap();
        if state.status == SyncStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "bulk load never recovered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();

    assert_eq!(bulk_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        states.of(OperationType::BulkLoad),
        vec![
            (SyncStatus::Running, None),
            (SyncStatus::Failed, None),
            (SyncStatus::Running, None),
            (SyncStatus::Completed, Some("1".to_string())),
        ]
    );
}
