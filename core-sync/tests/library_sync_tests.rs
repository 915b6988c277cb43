//! Integration tests for library sync runs
//!
//! These tests drive the orchestrator against an in-memory SQLite library:
//! - Per-entry failure isolation and failure log output
//! - Reconciliation of a fetched content list with local progress
//! - Single-flight merging of concurrent requests
//! - Cooperative cancellation and the storage failure guard
//! - Download and tracker side effects

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::BridgeError;
use bridge_traits::time::FixedClock;
use chrono::{DateTime, TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::{
    Category, CommittedSync, Episode, EpisodeChanges, FetchType, HistoryRecord, LibraryEntry,
    LibraryError, LibraryStore, SqliteLibraryStore, TrackLink,
};
use core_runtime::config::{AutoDownloadPolicy, LibrarySyncConfig};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use core_sync::{
    DownloadQueue, FailureKind, RawEpisode, RemoteSnapshot, RemoteSource, ResultReporter,
    RunOutcome, RunState, SourceError, StartOutcome, SyncError, SyncOrchestrator, SyncRegistry,
    SyncReport, SyncScope, SyncTarget, TrackerRefresh,
};
use mockall::mock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, Notify};

const SOURCE_ID: i64 = 1;

// ============================================================================
// Mock Implementations
// ============================================================================

/// Remote source serving canned listings keyed by entry url
struct MockSource {
    id: i64,
    name: String,
    listings: Arc<AsyncMutex<HashMap<String, Vec<RawEpisode>>>>,
    failures: Arc<AsyncMutex<HashMap<String, SourceError>>>,
    fetched: Arc<AsyncMutex<Vec<String>>>,
    panic_on: Option<String>,
    cancel_on: Option<(String, Arc<SyncRegistry>)>,
    /// (url, entered, release): fetching `url` signals `entered` and waits for `release`
    gate: Option<(String, Arc<Notify>, Arc<Notify>)>,
}

impl MockSource {
    fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            listings: Arc::new(AsyncMutex::new(HashMap::new())),
            failures: Arc::new(AsyncMutex::new(HashMap::new())),
            fetched: Arc::new(AsyncMutex::new(Vec::new())),
            panic_on: None,
            cancel_on: None,
            gate: None,
        }
    }

    async fn set_listing(&self, url: &str, episodes: Vec<RawEpisode>) {
        self.listings.lock().await.insert(url.to_string(), episodes);
    }

    async fn fail(&self, url: &str, error: SourceError) {
        self.failures.lock().await.insert(url.to_string(), error);
    }

    async fn fetched(&self) -> Vec<String> {
        self.fetched.lock().await.clone()
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch_metadata(&self, entry: &LibraryEntry) -> Result<RemoteSnapshot, SourceError> {
        let mut snapshot = RemoteSnapshot::from_entry(entry);
        snapshot.version = None;
        Ok(snapshot)
    }

    async fn fetch_content_list(&self, entry: &LibraryEntry) -> Result<Vec<RawEpisode>, SourceError> {
        self.fetched.lock().await.push(entry.url.clone());

        if let Some((url, entered, release)) = &self.gate {
            if *url == entry.url {
                entered.notify_one();
                release.notified().await;
            }
        }
        if let Some((url, registry)) = &self.cancel_on {
            if *url == entry.url {
                registry.cancel_active().await;
            }
        }
        if self.panic_on.as_deref() == Some(entry.url.as_str()) {
            panic!("parser blew up");
        }
        if let Some(error) = self.failures.lock().await.get(&entry.url) {
            return Err(error.clone());
        }

        let listing = self.listings.lock().await.get(&entry.url).cloned();
        Ok(listing.unwrap_or_else(|| {
            vec![RawEpisode::new(format!("{}/1", entry.url), "Episode 1", 1.0)]
        }))
    }
}

mock! {
    pub Catalog {}

    #[async_trait]
    impl RemoteSource for Catalog {
        fn id(&self) -> i64;
        fn name(&self) -> String;
        async fn fetch_metadata(&self, entry: &LibraryEntry) -> Result<RemoteSnapshot, SourceError>;
        async fn fetch_content_list(&self, entry: &LibraryEntry) -> Result<Vec<RawEpisode>, SourceError>;
    }
}

#[derive(Default)]
struct RecordingReporter {
    progress: Mutex<Vec<(usize, usize, i64)>>,
    completed: Mutex<Vec<SyncReport>>,
    failure_logs: Mutex<Vec<PathBuf>>,
}

impl ResultReporter for RecordingReporter {
    fn on_progress(&self, index: usize, total: usize, entry: &LibraryEntry) {
        self.progress.lock().unwrap().push((index, total, entry.id));
    }

    fn on_completed(&self, report: &SyncReport) {
        self.completed.lock().unwrap().push(report.clone());
    }

    fn on_failures_written(&self, location: &Path) {
        self.failure_logs.lock().unwrap().push(location.to_path_buf());
    }
}

#[derive(Default)]
struct RecordingQueue {
    requests: Mutex<Vec<(i64, Vec<String>)>>,
}

impl DownloadQueue for RecordingQueue {
    fn request_download(&self, entry: &LibraryEntry, episodes: &[Episode]) {
        let urls = episodes.iter().map(|e| e.url.clone()).collect();
        self.requests.lock().unwrap().push((entry.id, urls));
    }
}

struct MockTracker;

#[async_trait]
impl TrackerRefresh for MockTracker {
    async fn refresh(&self, entry: &LibraryEntry) -> Result<Vec<TrackLink>, SourceError> {
        let mut link = TrackLink::new(entry.id, 2, 77);
        link.title = entry.title.clone();
        link.last_episode_seen = 3.0;
        link.total_episodes = 12;
        Ok(vec![link])
    }
}

/// Library store whose entry commits can be switched to fail
struct FlakyStore {
    inner: SqliteLibraryStore,
    fail_commits: AtomicBool,
}

#[async_trait]
impl LibraryStore for FlakyStore {
    async fn list_library(&self) -> core_library::Result<Vec<LibraryEntry>> {
        self.inner.list_library().await
    }
    async fn find_by_id(&self, id: i64) -> core_library::Result<Option<LibraryEntry>> {
        self.inner.find_by_id(id).await
    }
    async fn children_of(&self, parent_id: i64) -> core_library::Result<Vec<LibraryEntry>> {
        self.inner.children_of(parent_id).await
    }
    async fn find_by_identity(&self, source_id: i64, url: &str) -> core_library::Result<Option<LibraryEntry>> {
        self.inner.find_by_identity(source_id, url).await
    }
    async fn episodes_for_entry(&self, entry_id: i64) -> core_library::Result<Vec<Episode>> {
        self.inner.episodes_for_entry(entry_id).await
    }
    async fn track_links_for_entry(&self, entry_id: i64) -> core_library::Result<Vec<TrackLink>> {
        self.inner.track_links_for_entry(entry_id).await
    }
    async fn history_for_entry(&self, entry_id: i64) -> core_library::Result<Vec<HistoryRecord>> {
        self.inner.history_for_entry(entry_id).await
    }
    async fn upsert_entry(&self, entry: &LibraryEntry) -> core_library::Result<LibraryEntry> {
        self.inner.upsert_entry(entry).await
    }
    async fn upsert_episodes(&self, inserts: &[Episode], updates: &[Episode]) -> core_library::Result<Vec<Episode>> {
        self.inner.upsert_episodes(inserts, updates).await
    }
    async fn upsert_track_links(&self, inserts: &[TrackLink], updates: &[TrackLink]) -> core_library::Result<()> {
        self.inner.upsert_track_links(inserts, updates).await
    }
    async fn upsert_history(&self, inserts: &[HistoryRecord], updates: &[HistoryRecord]) -> core_library::Result<()> {
        self.inner.upsert_history(inserts, updates).await
    }
    async fn commit_entry_sync(
        &self,
        entry: &LibraryEntry,
        episodes: &EpisodeChanges,
    ) -> core_library::Result<CommittedSync> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(LibraryError::Bridge(BridgeError::OperationFailed(
                "database is locked".to_string(),
            )));
        }
        self.inner.commit_entry_sync(entry, episodes).await
    }
    async fn list_categories(&self) -> core_library::Result<Vec<Category>> {
        self.inner.list_categories().await
    }
    async fn insert_category(&self, name: &str, order: i64) -> core_library::Result<Category> {
        self.inner.insert_category(name, order).await
    }
    async fn set_entry_categories(&self, entry_id: i64, category_ids: &[i64]) -> core_library::Result<()> {
        self.inner.set_entry_categories(entry_id, category_ids).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
}

async fn setup() -> (Arc<SqliteLibraryStore>, Arc<EventBus>, Arc<FixedClock>) {
    let pool = create_test_pool().await.unwrap();
    (
        Arc::new(SqliteLibraryStore::new(pool)),
        Arc::new(EventBus::new(256)),
        Arc::new(FixedClock::new(now())),
    )
}

fn slug(title: &str) -> String {
    format!("/series/{}", title.to_lowercase().replace(' ', "-"))
}

async fn add_favorite(store: &dyn LibraryStore, source_id: i64, title: &str, categories: &[i64]) -> LibraryEntry {
    let mut entry = LibraryEntry::new(source_id, slug(title), title);
    entry.favorite = true;
    let stored = store.upsert_entry(&entry).await.unwrap();
    if !categories.is_empty() {
        store.set_entry_categories(stored.id, categories).await.unwrap();
    }
    store.find_by_id(stored.id).await.unwrap().unwrap()
}

fn finished(outcome: RunOutcome) -> SyncReport {
    match outcome {
        RunOutcome::Finished(report) => report,
        other => panic!("expected a finished run, got {:?}", other),
    }
}

fn drain_events(receiver: &mut core_runtime::events::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_failing_entry_does_not_abort_run() {
    let (store, event_bus, clock) = setup().await;
    let mut entries = Vec::new();
    for title in ["Title 1", "Title 2", "Title 3", "Title 4", "Title 5"] {
        entries.push(add_favorite(store.as_ref(), SOURCE_ID, title, &[]).await);
    }

    let source = Arc::new(MockSource::new(SOURCE_ID, "Mock Source"));
    source
        .fail(&entries[1].url, SourceError::Transport("HTTP 503".to_string()))
        .await;

    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store.clone(), event_bus, clock).unwrap();
    orchestrator.register_source(source.clone()).await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.candidates, 5);
    assert_eq!(report.processed, 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry_id, entries[1].id);
    assert_eq!(report.failures[0].kind, FailureKind::Fetch);
    assert_eq!(report.failures[0].message, "HTTP 503");
    assert_eq!(report.failures[0].source, "Mock Source");
    assert_eq!(report.updates.len(), 4);

    let urls: Vec<String> = entries.iter().map(|e| e.url.clone()).collect();
    assert_eq!(source.fetched().await, urls);

    for (index, entry) in entries.iter().enumerate() {
        let episodes = store.episodes_for_entry(entry.id).await.unwrap();
        assert_eq!(episodes.len(), if index == 1 { 0 } else { 1 });
    }
}

#[tokio::test]
async fn test_sync_preserves_local_progress() {
    let (store, event_bus, clock) = setup().await;
    let entry = add_favorite(store.as_ref(), SOURCE_ID, "Entry A", &[]).await;

    let mut first = Episode::new(entry.id, "/a/1", "Episode 1");
    first.episode_number = 1.0;
    first.source_order = 2;
    first.seen = true;
    let mut second = Episode::new(entry.id, "/a/2", "Episode 2");
    second.episode_number = 2.0;
    second.source_order = 1;
    second.last_position_ms = 300;
    store.upsert_episodes(&[first, second], &[]).await.unwrap();
    let before = store.episodes_for_entry(entry.id).await.unwrap();

    let source = Arc::new(MockSource::new(SOURCE_ID, "Mock Source"));
    source
        .set_listing(
            &entry.url,
            vec![
                RawEpisode::new("/a/3", "Episode 3", 3.0),
                RawEpisode::new("/a/2", "Episode 2", 2.0),
                RawEpisode::new("/a/1", "Episode 1", 1.0),
            ],
        )
        .await;

    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store.clone(), event_bus, clock).unwrap();
    orchestrator.register_source(source).await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert_eq!(report.updates.len(), 1);
    let new_urls: Vec<&str> = report.updates[0]
        .new_episodes
        .iter()
        .map(|e| e.url.as_str())
        .collect();
    assert_eq!(new_urls, vec!["/a/3"]);

    let after = store.episodes_for_entry(entry.id).await.unwrap();
    assert_eq!(after.len(), 3);
    let by_url: HashMap<&str, &Episode> = after.iter().map(|e| (e.url.as_str(), e)).collect();
    assert!(by_url["/a/1"].seen);
    assert_eq!(by_url["/a/2"].last_position_ms, 300);

    // Matching episodes were left untouched
    for stored in &before {
        assert_eq!(by_url[stored.url.as_str()].version, stored.version);
    }

    let synced = store.find_by_id(entry.id).await.unwrap().unwrap();
    assert_eq!(synced.last_synced_at, now().timestamp_millis());
    assert!(synced.fetch_interval > 0);
}

#[tokio::test]
async fn test_failure_messages_and_log() {
    let (store, event_bus, clock) = setup().await;
    let empty = add_favorite(store.as_ref(), SOURCE_ID, "Empty Show", &[]).await;
    add_favorite(store.as_ref(), 99, "Orphan", &[]).await;

    let source = Arc::new(MockSource::new(SOURCE_ID, "Mock Source"));
    source.set_listing(&empty.url, Vec::new()).await;

    let dir = std::env::temp_dir().join(format!("library-sync-log-{}", std::process::id()));
    let file_system = Arc::new(TokioFileSystem::with_cache_dir(dir.join("cache")));
    let reporter = Arc::new(RecordingReporter::default());

    let orchestrator = SyncOrchestrator::new(LibrarySyncConfig::default(), store, event_bus, clock)
        .unwrap()
        .with_file_system(file_system)
        .with_reporter(reporter.clone());
    orchestrator.register_source(source).await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].kind, FailureKind::NoContentFound);
    assert_eq!(report.failures[0].message, "No episodes found");
    assert_eq!(report.failures[1].kind, FailureKind::SourceMissing);
    assert_eq!(report.failures[1].message, "Source not installed");
    assert_eq!(report.failures[1].source, "#99");

    let expected_path = dir.join("cache").join("library_update_errors.txt");
    assert_eq!(report.failure_log, Some(expected_path.clone()));
    let log = tokio::fs::read_to_string(&expected_path).await.unwrap();
    assert_eq!(
        log,
        "! No episodes found\n  # Mock Source\n    - Empty Show\n\
         ! Source not installed\n  # #99\n    - Orphan\n"
    );

    assert_eq!(*reporter.failure_logs.lock().unwrap(), vec![expected_path]);
    assert_eq!(reporter.completed.lock().unwrap().len(), 1);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_second_request_merges_into_running_sync() {
    let (store, event_bus, clock) = setup().await;
    let reading = store.insert_category("Reading", 1).await.unwrap().id;
    let watching = store.insert_category("Watching", 2).await.unwrap().id;
    let alpha = add_favorite(store.as_ref(), SOURCE_ID, "Alpha", &[reading]).await;
    let beta = add_favorite(store.as_ref(), SOURCE_ID, "Beta", &[watching]).await;

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let source = Arc::new(MockSource {
        gate: Some((alpha.url.clone(), entered.clone(), release.clone())),
        ..MockSource::new(SOURCE_ID, "Mock Source")
    });

    let orchestrator = Arc::new(
        SyncOrchestrator::new(LibrarySyncConfig::default(), store, event_bus, clock).unwrap(),
    );
    orchestrator.register_source(source.clone()).await;

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(SyncScope::category(reading)).await })
    };
    entered.notified().await;
    assert!(orchestrator.is_running().await);

    match orchestrator.run(SyncScope::category(watching)).await.unwrap() {
        RunOutcome::Merged { queued, .. } => assert_eq!(queued, 1),
        other => panic!("expected merge, got {:?}", other),
    }
    // Queuing the same entry again is a no-op
    match orchestrator.start(SyncScope::category(watching)).await.unwrap() {
        StartOutcome::Merged { queued, .. } => assert_eq!(queued, 0),
        other => panic!("expected merge, got {:?}", other),
    }
    // A metadata request is not folded into the content run
    let metadata = SyncScope::category(watching).with_target(SyncTarget::Metadata);
    match orchestrator.run(metadata).await.unwrap() {
        RunOutcome::Busy { target, .. } => assert_eq!(target, SyncTarget::Content),
        other => panic!("expected busy, got {:?}", other),
    }

    release.notify_one();
    let report = finished(first.await.unwrap().unwrap());

    assert_eq!(report.candidates, 2);
    let mut updated: Vec<i64> = report.updates.iter().map(|u| u.entry.id).collect();
    updated.sort();
    assert_eq!(updated, vec![alpha.id, beta.id]);
    assert_eq!(source.fetched().await, vec![alpha.url, beta.url]);
    assert!(!orchestrator.is_running().await);
}

#[tokio::test]
async fn test_cancellation_stops_between_entries() {
    let (store, event_bus, clock) = setup().await;
    let mut entries = Vec::new();
    for title in ["Title 1", "Title 2", "Title 3", "Title 4"] {
        entries.push(add_favorite(store.as_ref(), SOURCE_ID, title, &[]).await);
    }

    let registry = Arc::new(SyncRegistry::new());
    let source = Arc::new(MockSource {
        cancel_on: Some((entries[1].url.clone(), registry.clone())),
        ..MockSource::new(SOURCE_ID, "Mock Source")
    });

    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store.clone(), event_bus.clone(), clock)
            .unwrap()
            .with_registry(registry.clone());
    orchestrator.register_source(source.clone()).await;
    let mut events = event_bus.subscribe();

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.processed, 2);
    // The in-flight entry finishes and keeps its result
    assert_eq!(report.updates.len(), 2);
    assert_eq!(source.fetched().await, vec![entries[0].url.clone(), entries[1].url.clone()]);
    assert!(store.episodes_for_entry(entries[2].id).await.unwrap().is_empty());
    assert!(!registry.is_active().await);
    assert_eq!(orchestrator.status().await.unwrap().state, RunState::Cancelled);

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Cancelled { processed: 2, .. }))));
}

#[tokio::test]
async fn test_consecutive_storage_failures_abort_run() {
    let pool = create_test_pool().await.unwrap();
    let store = Arc::new(FlakyStore {
        inner: SqliteLibraryStore::new(pool),
        fail_commits: AtomicBool::new(false),
    });
    let mut entries = Vec::new();
    for title in ["Title 1", "Title 2", "Title 3", "Title 4"] {
        entries.push(add_favorite(store.as_ref(), SOURCE_ID, title, &[]).await);
    }
    store.fail_commits.store(true, Ordering::SeqCst);

    let event_bus = Arc::new(EventBus::new(256));
    let config = LibrarySyncConfig::builder()
        .max_consecutive_storage_failures(2)
        .build()
        .unwrap();
    let dir = std::env::temp_dir().join(format!("library-sync-systemic-{}", std::process::id()));
    let reporter = Arc::new(RecordingReporter::default());
    let orchestrator = SyncOrchestrator::new(
        config,
        store.clone(),
        event_bus.clone(),
        Arc::new(FixedClock::new(now())),
    )
    .unwrap()
    .with_file_system(Arc::new(TokioFileSystem::with_cache_dir(dir.clone())))
    .with_reporter(reporter.clone());
    let source = Arc::new(MockSource::new(SOURCE_ID, "Mock Source"));
    orchestrator.register_source(source.clone()).await;
    let mut events = event_bus.subscribe();

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.processed, 2);
    assert!(report.failures.is_empty());
    let systemic = report.systemic_failure.as_ref().unwrap();
    assert!(systemic.message.contains("database is locked"));
    assert_eq!(systemic.affected_entries, vec![entries[0].id, entries[1].id]);
    assert_eq!(source.fetched().await.len(), 2);
    assert!(!orchestrator.is_running().await);

    // The aborted entries still reach the failure log
    let expected_path = dir.join("library_update_errors.txt");
    assert_eq!(report.failure_log, Some(expected_path.clone()));
    let log = tokio::fs::read_to_string(&expected_path).await.unwrap();
    assert_eq!(
        log,
        format!(
            "! {}\n  # Mock Source\n    - Title 1\n    - Title 2\n",
            systemic.message
        )
    );
    assert_eq!(*reporter.failure_logs.lock().unwrap(), vec![expected_path]);

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Failed { processed: 2, .. }))));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_downloads_and_tracker_refresh() {
    let (store, event_bus, clock) = setup().await;
    let no_downloads = store.insert_category("No downloads", 1).await.unwrap().id;
    let kept = add_favorite(store.as_ref(), SOURCE_ID, "Kept", &[]).await;
    let excluded = add_favorite(store.as_ref(), SOURCE_ID, "Skipped", &[no_downloads]).await;

    let config = LibrarySyncConfig::builder()
        .auto_download(AutoDownloadPolicy {
            enabled: true,
            include_categories: Vec::new(),
            exclude_categories: vec![no_downloads],
        })
        .auto_refresh_trackers(true)
        .build()
        .unwrap();
    let queue = Arc::new(RecordingQueue::default());

    let orchestrator = SyncOrchestrator::new(config, store.clone(), event_bus, clock)
        .unwrap()
        .with_download_queue(queue.clone())
        .with_tracker_refresh(Arc::new(MockTracker));
    orchestrator
        .register_source(Arc::new(MockSource::new(SOURCE_ID, "Mock Source")))
        .await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert!(report.download_requested);
    assert_eq!(report.updates.len(), 2);
    assert_eq!(
        *queue.requests.lock().unwrap(),
        vec![(kept.id, vec![format!("{}/1", kept.url)])]
    );

    for entry in [&kept, &excluded] {
        let links = store.track_links_for_entry(entry.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].remote_id, 77);
        assert_eq!(links[0].last_episode_seen, 3.0);
    }
}

#[tokio::test]
async fn test_empty_library_is_silent() {
    let (store, event_bus, clock) = setup().await;
    let reporter = Arc::new(RecordingReporter::default());
    let orchestrator = SyncOrchestrator::new(LibrarySyncConfig::default(), store, event_bus.clone(), clock)
        .unwrap()
        .with_reporter(reporter.clone());
    let mut events = event_bus.subscribe();

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert!(report.is_silent());
    assert_eq!(report.state, RunState::Completed);
    assert!(reporter.completed.lock().unwrap().is_empty());
    assert!(reporter.failure_logs.lock().unwrap().is_empty());
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Started { candidates: 0, .. }))));
}

#[tokio::test]
async fn test_panicking_entry_is_recorded() {
    let (store, event_bus, clock) = setup().await;
    let broken = add_favorite(store.as_ref(), SOURCE_ID, "Broken", &[]).await;
    let healthy = add_favorite(store.as_ref(), SOURCE_ID, "Healthy", &[]).await;

    let source = Arc::new(MockSource {
        panic_on: Some(broken.url.clone()),
        ..MockSource::new(SOURCE_ID, "Mock Source")
    });
    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store, event_bus, clock).unwrap();
    orchestrator.register_source(source).await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry_id, broken.id);
    assert_eq!(report.failures[0].kind, FailureKind::Unexpected);
    assert_eq!(report.failures[0].message, "parser blew up");
    assert_eq!(report.updates.len(), 1);
    assert_eq!(report.updates[0].entry.id, healthy.id);
}

#[tokio::test]
async fn test_progress_is_monotonic_with_concurrency() {
    let (store, event_bus, clock) = setup().await;
    let mut ids = Vec::new();
    for title in ["Title 1", "Title 2", "Title 3", "Title 4", "Title 5"] {
        ids.push(add_favorite(store.as_ref(), SOURCE_ID, title, &[]).await.id);
    }

    let config = LibrarySyncConfig::builder()
        .max_concurrent_entries(3)
        .build()
        .unwrap();
    let reporter = Arc::new(RecordingReporter::default());
    let orchestrator = SyncOrchestrator::new(config, store, event_bus.clone(), clock)
        .unwrap()
        .with_reporter(reporter.clone());
    orchestrator
        .register_source(Arc::new(MockSource::new(SOURCE_ID, "Mock Source")))
        .await;
    let mut events = event_bus.subscribe();

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());
    assert_eq!(report.updates.len(), 5);

    let indexes: Vec<u64> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            CoreEvent::Sync(SyncEvent::Progress { index, total, .. }) => {
                assert_eq!(total, 5);
                Some(index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(indexes, vec![1, 2, 3, 4, 5]);

    let progress = reporter.progress.lock().unwrap().clone();
    let reported: Vec<i64> = progress.iter().map(|(_, _, id)| *id).collect();
    assert_eq!(reported, ids);
}

#[tokio::test]
async fn test_metadata_target_updates_entry() {
    let (store, event_bus, clock) = setup().await;
    let entry = add_favorite(store.as_ref(), SOURCE_ID, "Frieren", &[]).await;

    let mut catalog = MockCatalog::new();
    catalog.expect_id().return_const(SOURCE_ID);
    catalog.expect_name().return_const("Catalog".to_string());
    catalog.expect_fetch_metadata().times(1).returning(|entry| {
        let mut snapshot = RemoteSnapshot::from_entry(entry);
        snapshot.version = None;
        snapshot.author = Some("Kanehito Yamada".to_string());
        snapshot.description = Some("A mage outlives her party.".to_string());
        snapshot.initialized = true;
        Ok(snapshot)
    });
    catalog.expect_fetch_content_list().never();

    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store.clone(), event_bus.clone(), clock)
            .unwrap();
    orchestrator.register_source(Arc::new(catalog)).await;
    let mut events = event_bus.subscribe();

    let report = finished(
        orchestrator
            .run(SyncScope::library().with_target(SyncTarget::Metadata))
            .await
            .unwrap(),
    );

    assert!(report.failures.is_empty());
    assert!(report.updates.is_empty());
    let stored = store.find_by_id(entry.id).await.unwrap().unwrap();
    assert_eq!(stored.author.as_deref(), Some("Kanehito Yamada"));
    assert_eq!(stored.description.as_deref(), Some("A mage outlives her party."));
    assert!(stored.initialized);
    assert!(stored.favorite);

    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        CoreEvent::Library(LibraryEvent::EntryUpdated { entry_id, .. }) if *entry_id == entry.id
    )));
}

#[tokio::test]
async fn test_tracker_target_requires_tracker_service() {
    let (store, event_bus, clock) = setup().await;
    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store, event_bus, clock).unwrap();

    let result = orchestrator
        .run(SyncScope::library().with_target(SyncTarget::Trackers))
        .await;
    assert!(matches!(result, Err(SyncError::Config(_))));
    assert!(!orchestrator.is_running().await);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let (store, event_bus, clock) = setup().await;
    let config = LibrarySyncConfig {
        max_concurrent_entries: 0,
        ..LibrarySyncConfig::default()
    };

    let result = SyncOrchestrator::new(config, store, event_bus, clock);
    assert!(matches!(result, Err(SyncError::Config(_))));
}

#[tokio::test]
async fn test_season_groups_sync_their_seasons() {
    let (store, event_bus, clock) = setup().await;

    let mut group = LibraryEntry::new(SOURCE_ID, "/series/show", "Show");
    group.favorite = true;
    group.fetch_type = FetchType::Seasons;
    let group = store.upsert_entry(&group).await.unwrap();

    let mut first = LibraryEntry::new(SOURCE_ID, "/series/show/s1", "Show Season 1");
    first.parent_id = Some(group.id);
    let first = store.upsert_entry(&first).await.unwrap();

    // A favorite season is part of the library on its own
    let mut second = LibraryEntry::new(SOURCE_ID, "/series/show/s2", "Show Season 2");
    second.parent_id = Some(group.id);
    second.favorite = true;
    let second = store.upsert_entry(&second).await.unwrap();

    let source = Arc::new(MockSource::new(SOURCE_ID, "Mock Source"));
    let orchestrator =
        SyncOrchestrator::new(LibrarySyncConfig::default(), store.clone(), event_bus.clone(), clock.clone())
            .unwrap();
    orchestrator.register_source(source.clone()).await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());
    assert_eq!(report.skipped, 1);
    assert_eq!(source.fetched().await, vec![second.url.clone()]);

    let config = LibrarySyncConfig::builder().update_seasons(true).build().unwrap();
    let orchestrator = SyncOrchestrator::new(config, store.clone(), event_bus, clock).unwrap();
    let seasons = Arc::new(MockSource::new(SOURCE_ID, "Mock Source"));
    orchestrator.register_source(seasons.clone()).await;

    let report = finished(orchestrator.run(SyncScope::library()).await.unwrap());
    assert!(report.failures.is_empty());
    let mut fetched = seasons.fetched().await;
    fetched.sort();
    assert_eq!(fetched, vec![first.url.clone(), second.url.clone()]);

    // The group itself never gets episodes
    assert!(store.episodes_for_entry(group.id).await.unwrap().is_empty());
    assert_eq!(store.episodes_for_entry(first.id).await.unwrap().len(), 1);
    let updated: Vec<i64> = report.updates.iter().map(|u| u.entry.id).collect();
    assert!(updated.contains(&first.id));
}
