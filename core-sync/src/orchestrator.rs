//! # Sync Orchestrator
//!
//! Drives library sync runs: selection, ranking, the per-entry pipeline and the
//! terminal report.
//!
//! ## Overview
//!
//! A run goes through these phases:
//! 1. List the library from the [`LibraryStore`] and select candidates for the scope,
//!    expanding season groups into their seasons when `update_seasons` is on
//! 2. Rank candidates with the scope's strategy (or the configured one)
//! 3. Claim the single-flight slot in the [`SyncRegistry`], or merge into the active run
//! 4. Process entries through a bounded window of `max_concurrent_entries` tasks
//! 5. Fold results into the report, write the failure log, emit the terminal event
//!
//! Each entry of a content run is fetched, reconciled and committed in one
//! storage transaction. A failing entry is recorded and the run moves on.
//! Consecutive storage failures are the exception: once
//! `max_consecutive_storage_failures` entries in a row could not be written the
//! rest of the run is abandoned and reported as one systemic failure.
//!
//! Cancellation is cooperative. The token is checked before each dispatch and
//! in-flight entries finish on their own.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{RunOutcome, SyncOrchestrator, SyncScope};
//!
//! let orchestrator = SyncOrchestrator::new(config, store, event_bus, clock)?
//!     .with_file_system(file_system)
//!     .with_reporter(reporter);
//! orchestrator.register_source(source).await;
//!
//! match orchestrator.run(SyncScope::category(3)).await? {
//!     RunOutcome::Finished(report) => println!("{} new episodes", report.new_episode_count()),
//!     RunOutcome::Merged { run_id, queued } => println!("{} queued on {}", queued, run_id),
//!     RunOutcome::Busy { run_id, target } => println!("{} is syncing {}", run_id, target),
//! }
//! ```

use crate::collaborators::{DownloadQueue, ResultReporter, TrackerRefresh};
use crate::job::{RunId, RunState, SyncRun};
use crate::merger::{merge_entry, merge_episodes, merge_track_links, prepare_content};
use crate::ranker::rank;
use crate::registry::{Admission, SyncRegistry};
use crate::report::{
    write_failure_log, EntryUpdate, FailureKind, FailureRecord, SyncReport, SystemicFailure,
    NO_CONTENT_MESSAGE, SOURCE_MISSING_MESSAGE,
};
use crate::schedule::reschedule;
use crate::selector::{EntrySelector, SyncScope, SyncTarget};
use crate::source::{into_content, ContentError, RemoteSource, SourceError};
use crate::{Result, SyncError};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::{Episode, FetchType, LibraryEntry, LibraryError, LibraryStore};
use core_runtime::config::{LibrarySyncConfig, RankingStrategy};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Result of [`SyncOrchestrator::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The run was executed to a terminal state.
    Finished(SyncReport),
    /// Another run for the same target was active; the candidates were
    /// queued on it.
    Merged { run_id: RunId, queued: usize },
    /// Another run for a different target was active; nothing was queued.
    Busy { run_id: RunId, target: SyncTarget },
}

/// Result of [`SyncOrchestrator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(RunId),
    Merged { run_id: RunId, queued: usize },
    Busy { run_id: RunId, target: SyncTarget },
}

enum Admitted {
    Run(PreparedRun),
    Merged { run_id: RunId, queued: usize },
    Busy { run_id: RunId, target: SyncTarget },
}

struct PreparedRun {
    run: SyncRun,
    candidates: Vec<LibraryEntry>,
    skipped: usize,
    strategy: RankingStrategy,
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

// ============================================================================
// Per-entry outcomes
// ============================================================================

enum EntryOutcome {
    Synced {
        entry: LibraryEntry,
        new_episodes: Vec<Episode>,
    },
    /// Removed from the library, or no longer a favorite, since selection
    Vanished,
    Failed(EntryFailure),
}

#[derive(Debug)]
struct EntryFailure {
    kind: FailureKind,
    message: String,
}

impl EntryFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<LibraryError> for EntryFailure {
    fn from(e: LibraryError) -> Self {
        Self::new(FailureKind::Storage, e.to_string())
    }
}

impl From<SourceError> for EntryFailure {
    fn from(e: SourceError) -> Self {
        Self::new(FailureKind::Fetch, e.to_string())
    }
}

impl From<ContentError> for EntryFailure {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::NoContentFound => {
                Self::new(FailureKind::NoContentFound, NO_CONTENT_MESSAGE)
            }
            ContentError::Transport(e) => e.into(),
        }
    }
}

/// Single-writer accumulator of a run's results.
struct RunResults {
    updates: Vec<EntryUpdate>,
    failures: Vec<FailureRecord>,
    /// Storage failures of consecutive entries, not yet known to be systemic
    storage_streak: Vec<FailureRecord>,
    systemic: Option<SystemicFailure>,
    /// Entries behind `systemic`, kept for the failure log
    systemic_records: Vec<FailureRecord>,
    download_requested: bool,
    storage_failure_limit: usize,
}

impl RunResults {
    fn new(storage_failure_limit: usize) -> Self {
        Self {
            updates: Vec::new(),
            failures: Vec::new(),
            storage_streak: Vec::new(),
            systemic: None,
            systemic_records: Vec::new(),
            download_requested: false,
            storage_failure_limit,
        }
    }

    fn record_success(&mut self) {
        self.flush_streak();
    }

    /// Record a failed entry. Returns `true` when this failure made the run
    /// systemic.
    fn record_failure(&mut self, record: FailureRecord) -> bool {
        if record.kind != FailureKind::Storage {
            self.flush_streak();
            self.failures.push(record);
            return false;
        }

        if let Some(systemic) = self.systemic.as_mut() {
            systemic.affected_entries.push(record.entry_id);
            self.systemic_records.push(record);
            return false;
        }

        self.storage_streak.push(record);
        if self.storage_streak.len() < self.storage_failure_limit {
            return false;
        }

        let streak = std::mem::take(&mut self.storage_streak);
        self.systemic = Some(SystemicFailure {
            message: streak[0].message.clone(),
            affected_entries: streak.iter().map(|r| r.entry_id).collect(),
        });
        self.systemic_records = streak;
        true
    }

    fn flush_streak(&mut self) {
        self.failures.append(&mut self.storage_streak);
    }

    /// Everything the failure log lists. Entries behind a systemic failure are
    /// grouped under its message.
    fn log_records(&self) -> Vec<FailureRecord> {
        let mut records = self.failures.clone();
        if let Some(systemic) = &self.systemic {
            records.extend(self.systemic_records.iter().map(|record| FailureRecord {
                message: systemic.message.clone(),
                ..record.clone()
            }));
        }
        records
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs library syncs against registered remote sources.
pub struct SyncOrchestrator {
    config: LibrarySyncConfig,
    store: Arc<dyn LibraryStore>,
    sources: Arc<RwLock<HashMap<i64, Arc<dyn RemoteSource>>>>,
    registry: Arc<SyncRegistry>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    download_queue: Option<Arc<dyn DownloadQueue>>,
    tracker_refresh: Option<Arc<dyn TrackerRefresh>>,
    reporter: Option<Arc<dyn ResultReporter>>,
    last_run: Arc<Mutex<Option<SyncRun>>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator with its own run registry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn new(
        config: LibrarySyncConfig,
        store: Arc<dyn LibraryStore>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            sources: Arc::new(RwLock::new(HashMap::new())),
            registry: Arc::new(SyncRegistry::new()),
            event_bus,
            clock,
            file_system: None,
            download_queue: None,
            tracker_refresh: None,
            reporter: None,
            last_run: Arc::new(Mutex::new(None)),
        })
    }

    /// Share a run registry with other orchestrators.
    pub fn with_registry(mut self, registry: Arc<SyncRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// File system used to write the failure log. Without one no log is written.
    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(file_system);
        self
    }

    pub fn with_download_queue(mut self, queue: Arc<dyn DownloadQueue>) -> Self {
        self.download_queue = Some(queue);
        self
    }

    pub fn with_tracker_refresh(mut self, tracker_refresh: Arc<dyn TrackerRefresh>) -> Self {
        self.tracker_refresh = Some(tracker_refresh);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ResultReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Register a remote source, replacing any source with the same id.
    pub async fn register_source(&self, source: Arc<dyn RemoteSource>) {
        let id = source.id();
        let name = source.name();
        self.sources.write().await.insert(id, source);
        info!(source_id = id, source = %name, "Registered remote source");
    }

    /// Run a sync for `scope` to completion.
    ///
    /// If another run for the same target is active the scope's candidates
    /// are merged into it and this call returns immediately. A run for another
    /// target turns the request away with [`RunOutcome::Busy`].
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be listed or the scope needs a
    /// collaborator that is not configured. Failures of individual entries are
    /// part of the report.
    #[instrument(skip(self), fields(filter = ?scope.filter, target = %scope.target))]
    pub async fn run(&self, scope: SyncScope) -> Result<RunOutcome> {
        match self.prepare(scope).await? {
            Admitted::Run(prepared) => Ok(RunOutcome::Finished(self.execute(prepared).await)),
            Admitted::Merged { run_id, queued } => Ok(RunOutcome::Merged { run_id, queued }),
            Admitted::Busy { run_id, target } => Ok(RunOutcome::Busy { run_id, target }),
        }
    }

    /// Start a sync for `scope` in the background.
    ///
    /// Observe the run through the event bus, the reporter or [`Self::status`].
    #[instrument(skip(self), fields(filter = ?scope.filter, target = %scope.target))]
    pub async fn start(&self, scope: SyncScope) -> Result<StartOutcome> {
        match self.prepare(scope).await? {
            Admitted::Run(prepared) => {
                let run_id = prepared.run.id;
                let orchestrator = self.clone_for_task();
                tokio::spawn(async move {
                    let report = orchestrator.execute(prepared).await;
                    debug!(run_id = %report.run_id, state = %report.state, "Background sync finished");
                });
                Ok(StartOutcome::Started(run_id))
            }
            Admitted::Merged { run_id, queued } => Ok(StartOutcome::Merged { run_id, queued }),
            Admitted::Busy { run_id, target } => Ok(StartOutcome::Busy { run_id, target }),
        }
    }

    /// Ask the active run to stop after its in-flight entries.
    ///
    /// Returns `false` if no run was active.
    pub async fn cancel(&self) -> bool {
        match self.registry.cancel_active().await {
            Some(run_id) => {
                info!(run_id = %run_id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.registry.is_active().await
    }

    /// Latest snapshot of the current or most recent run.
    pub async fn status(&self) -> Option<SyncRun> {
        self.last_run.lock().await.clone()
    }

    /// Clone for background task (avoids Arc<Arc<...>>)
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            sources: Arc::clone(&self.sources),
            registry: Arc::clone(&self.registry),
            event_bus: Arc::clone(&self.event_bus),
            clock: Arc::clone(&self.clock),
            file_system: self.file_system.clone(),
            download_queue: self.download_queue.clone(),
            tracker_refresh: self.tracker_refresh.clone(),
            reporter: self.reporter.clone(),
            last_run: Arc::clone(&self.last_run),
        }
    }

    // ------------------------------------------------------------------------
    // Selection & admission
    // ------------------------------------------------------------------------

    async fn prepare(&self, scope: SyncScope) -> Result<Admitted> {
        if scope.target == SyncTarget::Trackers && self.tracker_refresh.is_none() {
            return Err(SyncError::Config(
                "tracker sync requested but no tracker refresh service is configured".to_string(),
            ));
        }

        let now = self.clock.now();
        let run = SyncRun::new(scope, now).begin_selecting()?;

        let library = self.store.list_library().await?;
        let mut selector = EntrySelector::from_config(&self.config, now);
        if self.config.update_seasons {
            selector = selector.with_seasons(self.load_seasons(&library).await?);
        }
        let selection = selector.select_detailed(&library, &scope);
        let skipped = selection.skipped.len();

        let run = run.begin_ranking()?;
        let strategy = scope.strategy.unwrap_or(self.config.ranking_strategy);
        let candidates = rank(selection.selected, strategy, now.timestamp_millis());
        let run = run.start(candidates.len() as u64)?;

        let token = match self.registry.admit(run.id, scope.target, &candidates).await {
            Admission::Started(token) => token,
            Admission::Busy { run_id, target } => {
                info!(run_id = %run_id, active = %target, "Sync for another target is running, request dropped");
                return Ok(Admitted::Busy { run_id, target });
            }
            Admission::Merged { run_id, queued } => {
                info!(run_id = %run_id, queued, "Sync already running, merged request");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Merged {
                        run_id: run_id.to_string(),
                        queued: queued as u64,
                    }))
                    .ok();
                return Ok(Admitted::Merged { run_id, queued });
            }
        };

        self.warn_crowded_sources(&candidates);
        *self.last_run.lock().await = Some(run.clone());

        info!(
            run_id = %run.id,
            candidates = candidates.len(),
            skipped,
            strategy = %strategy,
            "Starting library sync"
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                run_id: run.id.to_string(),
                candidates: candidates.len() as u64,
                target: scope.target.to_string(),
            }))
            .ok();

        Ok(Admitted::Run(PreparedRun {
            run,
            candidates,
            skipped,
            strategy,
            token,
            started_at: now,
        }))
    }

    async fn load_seasons(&self, library: &[LibraryEntry]) -> Result<HashMap<i64, Vec<LibraryEntry>>> {
        let mut seasons = HashMap::new();
        for group in library.iter().filter(|e| e.fetch_type == FetchType::Seasons) {
            seasons.insert(group.id, self.store.children_of(group.id).await?);
        }
        Ok(seasons)
    }

    fn warn_crowded_sources(&self, candidates: &[LibraryEntry]) {
        let mut per_source: HashMap<i64, usize> = HashMap::new();
        for entry in candidates {
            *per_source.entry(entry.source_id).or_default() += 1;
        }
        for (source_id, count) in per_source {
            if count > self.config.source_warning_threshold {
                warn!(
                    source_id,
                    count,
                    "Many entries queued for one source, requests may be throttled"
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------------

    #[instrument(skip_all, fields(run_id = %prepared.run.id))]
    async fn execute(&self, prepared: PreparedRun) -> SyncReport {
        let PreparedRun {
            mut run,
            candidates,
            skipped,
            strategy,
            token,
            started_at,
        } = prepared;
        let run_id = run.id;
        let target = run.scope.target;

        let mut queue: VecDeque<LibraryEntry> = candidates.into();
        let mut total = queue.len();
        let mut dispatched = 0;
        let mut results = RunResults::new(self.config.max_consecutive_storage_failures);
        let mut in_flight: JoinSet<(LibraryEntry, EntryOutcome)> = JoinSet::new();
        let mut tracker_tasks: JoinSet<()> = JoinSet::new();

        loop {
            while in_flight.len() < self.config.max_concurrent_entries && !token.is_cancelled() {
                let Some(entry) = queue.pop_front() else {
                    break;
                };
                dispatched += 1;
                self.report_progress(&mut run, dispatched, total, &entry).await;

                let task = self.clone_for_task();
                in_flight.spawn(async move {
                    let outcome = AssertUnwindSafe(task.sync_entry(&entry, target))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            EntryOutcome::Failed(EntryFailure::new(
                                FailureKind::Unexpected,
                                panic_message(panic),
                            ))
                        });
                    (entry, outcome)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((entry, outcome))) => {
                    self.apply_outcome(&mut run, &mut results, &mut tracker_tasks, entry, outcome, target)
                        .await;
                    if results.systemic.is_some() && !token.is_cancelled() {
                        error!(run_id = %run_id, "Storage keeps failing, abandoning the rest of the run");
                        token.cancel();
                    }
                }
                Some(Err(e)) => {
                    error!(run_id = %run_id, error = %e, "Entry task did not complete");
                }
                None => {
                    if token.is_cancelled() {
                        break;
                    }
                    let merged = self.registry.drain_or_release(run_id).await;
                    if merged.is_empty() {
                        break;
                    }
                    debug!(run_id = %run_id, count = merged.len(), "Picked up merged entries");
                    total += merged.len();
                    if let Err(e) = run.extend_total(merged.len() as u64) {
                        warn!(error = %e, "Could not extend run total");
                    }
                    queue.extend(merged);
                }
            }
        }

        while let Some(joined) = tracker_tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Tracker refresh task did not complete");
            }
        }

        if token.is_cancelled() {
            let dropped = self.registry.release(run_id).await;
            if dropped > 0 {
                debug!(run_id = %run_id, dropped, "Dropped merged entries of stopped run");
            }
        }

        self.finish(run, results, total, skipped, dispatched, strategy, &token, started_at)
            .await
    }

    async fn report_progress(&self, run: &mut SyncRun, index: usize, total: usize, entry: &LibraryEntry) {
        if let Err(e) = run.record_progress(index as u64, &entry.title) {
            warn!(error = %e, "Could not record progress");
        }
        *self.last_run.lock().await = Some(run.clone());

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Progress {
                run_id: run.id.to_string(),
                index: index as u64,
                total: total as u64,
                entry_id: entry.id,
                title: entry.title.clone(),
            }))
            .ok();

        if let Some(reporter) = &self.reporter {
            reporter.on_progress(index, total, entry);
        }
    }

    async fn apply_outcome(
        &self,
        run: &mut SyncRun,
        results: &mut RunResults,
        tracker_tasks: &mut JoinSet<()>,
        entry: LibraryEntry,
        outcome: EntryOutcome,
        target: SyncTarget,
    ) {
        match outcome {
            EntryOutcome::Synced {
                entry: stored,
                new_episodes,
            } => {
                results.record_success();

                if target == SyncTarget::Content && self.config.auto_refresh_trackers {
                    if let Some(tracker_refresh) = &self.tracker_refresh {
                        let task = self.clone_for_task();
                        let tracker_refresh = Arc::clone(tracker_refresh);
                        let entry = stored.clone();
                        tracker_tasks.spawn(async move {
                            if let Err(e) = task.refresh_track_links(tracker_refresh.as_ref(), &entry).await {
                                warn!(entry_id = entry.id, error = %e.message, "Tracker refresh failed");
                            }
                        });
                    }
                }

                if new_episodes.is_empty() {
                    return;
                }

                let update = EntryUpdate::new(stored, new_episodes);
                let count = update.new_episodes.len() as u64;
                self.event_bus
                    .emit(CoreEvent::Library(LibraryEvent::EpisodesAdded {
                        entry_id: update.entry.id,
                        count,
                    }))
                    .ok();

                let policy = &self.config.auto_download;
                if policy.allows(update.entry.favorite, &update.entry.categories) {
                    if let Some(queue) = &self.download_queue {
                        queue.request_download(&update.entry, &update.new_episodes);
                    }
                    self.event_bus
                        .emit(CoreEvent::Sync(SyncEvent::DownloadRequested {
                            entry_id: update.entry.id,
                            episode_count: count,
                        }))
                        .ok();
                    results.download_requested = true;
                }

                results.updates.push(update);
            }
            EntryOutcome::Vanished => {
                debug!(entry_id = entry.id, "Entry left the library during the run, skipped");
            }
            EntryOutcome::Failed(failure) => {
                warn!(
                    entry_id = entry.id,
                    title = %entry.title,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "Failed to update entry"
                );
                run.record_failure();
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::EntryFailed {
                        run_id: run.id.to_string(),
                        entry_id: entry.id,
                        title: entry.title.clone(),
                        message: failure.message.clone(),
                    }))
                    .ok();

                let record = FailureRecord {
                    entry_id: entry.id,
                    title: entry.title,
                    source: self.source_label(entry.source_id).await,
                    kind: failure.kind,
                    message: failure.message,
                };
                results.record_failure(record);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        run: SyncRun,
        results: RunResults,
        candidates: usize,
        skipped: usize,
        processed: usize,
        strategy: RankingStrategy,
        token: &CancellationToken,
        started_at: DateTime<Utc>,
    ) -> SyncReport {
        let mut results = results;
        if results.systemic.is_none() {
            results.flush_streak();
        }

        let failure_log = match &self.file_system {
            Some(file_system) => {
                write_failure_log(
                    file_system.as_ref(),
                    &self.config.failure_log_file_name,
                    &results.log_records(),
                )
                .await
            }
            None => None,
        };

        let finished_at = self.clock.now();
        let run = match &results.systemic {
            Some(systemic) => settle(run, RunState::Failed, Some(&systemic.message), finished_at),
            None if token.is_cancelled() => settle(run, RunState::Cancelled, None, finished_at),
            None => settle(run, RunState::Completed, None, finished_at),
        };

        let report = SyncReport {
            run_id: run.id,
            scope: run.scope,
            strategy,
            state: run.state,
            candidates,
            skipped,
            processed,
            updates: results.updates,
            failures: results.failures,
            systemic_failure: results.systemic,
            download_requested: results.download_requested,
            failure_log,
            started_at,
            finished_at,
        };

        if let Some(reporter) = &self.reporter {
            if let Some(location) = &report.failure_log {
                reporter.on_failures_written(location);
            }
            if !report.is_silent() {
                reporter.on_completed(&report);
            }
        }

        let run_id = run.id.to_string();
        let event = match (&report.systemic_failure, report.state) {
            (Some(systemic), _) => SyncEvent::Failed {
                run_id,
                message: systemic.message.clone(),
                processed: processed as u64,
            },
            (None, RunState::Cancelled) => SyncEvent::Cancelled {
                run_id,
                processed: processed as u64,
            },
            _ => SyncEvent::Completed {
                run_id,
                entries_updated: report.updates.len() as u64,
                new_episodes: report.new_episode_count() as u64,
                failures: report.failures.len() as u64,
                duration_ms: report.duration_ms(),
            },
        };
        self.event_bus.emit(CoreEvent::Sync(event)).ok();

        info!(
            run_id = %report.run_id,
            state = %report.state,
            processed,
            updated = report.updates.len(),
            new_episodes = report.new_episode_count(),
            failures = report.failures.len(),
            "Library sync finished"
        );

        *self.last_run.lock().await = Some(run);
        report
    }

    // ------------------------------------------------------------------------
    // Entry pipeline
    // ------------------------------------------------------------------------

    async fn sync_entry(&self, entry: &LibraryEntry, target: SyncTarget) -> EntryOutcome {
        let result = match target {
            SyncTarget::Content => self.sync_content(entry).await,
            SyncTarget::Metadata => self.sync_metadata(entry).await,
            SyncTarget::Trackers => self.sync_trackers(entry).await,
        };
        result.unwrap_or_else(EntryOutcome::Failed)
    }

    async fn sync_content(&self, entry: &LibraryEntry) -> std::result::Result<EntryOutcome, EntryFailure> {
        let source = self.source_for(entry).await?;

        let Some(current) = self.store.find_by_id(entry.id).await? else {
            return Ok(EntryOutcome::Vanished);
        };
        if !current.favorite && current.parent_id.is_none() {
            return Ok(EntryOutcome::Vanished);
        }

        let mut merged = current.clone();
        if self.config.refresh_metadata {
            let snapshot = source.fetch_metadata(&current).await?;
            merged = merge_entry(Some(&current), &snapshot);
        }

        let raw = into_content(source.fetch_content_list(&merged).await)?;
        let now = self.clock.now();
        let local = self.store.episodes_for_entry(current.id).await?;
        let remote = prepare_content(raw, current.id, now.timestamp_millis());
        let changes = merge_episodes(&local, &remote);

        let projected: Vec<Episode> = local
            .iter()
            .chain(changes.to_insert.iter())
            .cloned()
            .collect();
        merged.last_synced_at = now.timestamp_millis();
        let (next_sync_at, fetch_interval) = reschedule(&merged, &projected, now);
        merged.next_sync_at = next_sync_at;
        merged.fetch_interval = fetch_interval;

        let committed = self.store.commit_entry_sync(&merged, &changes).await?;
        debug!(
            entry_id = committed.entry.id,
            inserted = committed.inserted.len(),
            updated = changes.to_update.len(),
            "Synced entry content"
        );

        Ok(EntryOutcome::Synced {
            entry: committed.entry,
            new_episodes: committed.inserted,
        })
    }

    async fn sync_metadata(&self, entry: &LibraryEntry) -> std::result::Result<EntryOutcome, EntryFailure> {
        let source = self.source_for(entry).await?;
        let snapshot = source.fetch_metadata(entry).await?;
        let merged = merge_entry(Some(entry), &snapshot);

        if merged == *entry {
            return Ok(EntryOutcome::Synced {
                entry: merged,
                new_episodes: Vec::new(),
            });
        }

        let stored = self.store.upsert_entry(&merged).await?;
        self.event_bus
            .emit(CoreEvent::Library(LibraryEvent::EntryUpdated {
                entry_id: stored.id,
                title: stored.title.clone(),
            }))
            .ok();

        Ok(EntryOutcome::Synced {
            entry: stored,
            new_episodes: Vec::new(),
        })
    }

    async fn sync_trackers(&self, entry: &LibraryEntry) -> std::result::Result<EntryOutcome, EntryFailure> {
        if let Some(tracker_refresh) = &self.tracker_refresh {
            self.refresh_track_links(tracker_refresh.as_ref(), entry).await?;
        }
        Ok(EntryOutcome::Synced {
            entry: entry.clone(),
            new_episodes: Vec::new(),
        })
    }

    async fn refresh_track_links(
        &self,
        tracker_refresh: &dyn TrackerRefresh,
        entry: &LibraryEntry,
    ) -> std::result::Result<usize, EntryFailure> {
        let remote = tracker_refresh.refresh(entry).await?;
        let local = self.store.track_links_for_entry(entry.id).await?;
        let (inserts, updates) = merge_track_links(entry.id, &local, &remote);

        let count = inserts.len() + updates.len();
        if count > 0 {
            self.store.upsert_track_links(&inserts, &updates).await?;
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::TrackLinksUpdated {
                    entry_id: entry.id,
                    count: count as u64,
                }))
                .ok();
        }
        Ok(count)
    }

    async fn source_for(&self, entry: &LibraryEntry) -> std::result::Result<Arc<dyn RemoteSource>, EntryFailure> {
        self.sources
            .read()
            .await
            .get(&entry.source_id)
            .cloned()
            .ok_or_else(|| EntryFailure::new(FailureKind::SourceMissing, SOURCE_MISSING_MESSAGE))
    }

    async fn source_label(&self, source_id: i64) -> String {
        match self.sources.read().await.get(&source_id) {
            Some(source) => source.name(),
            None => format!("#{}", source_id),
        }
    }
}

/// Move `run` to its terminal state, keeping the last snapshot if the
/// transition is rejected.
fn settle(run: SyncRun, to: RunState, message: Option<&str>, at: DateTime<Utc>) -> SyncRun {
    let fallback = run.clone();
    let settled = match to {
        RunState::Failed => run.fail(message.unwrap_or_default(), at),
        RunState::Cancelled => run.cancel(at),
        _ => run.complete(at),
    };
    settled.unwrap_or_else(|e| {
        error!(error = %e, "Could not settle sync run");
        fallback
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Entry update panicked".to_string()
    }
}
