//! # Library Sync Engine
//!
//! Refreshes tracked library entries against remote sources and reconciles the
//! results into the local library without losing user-owned state.
//!
//! ## Overview
//!
//! A sync run selects candidates from the library, orders them, and works
//! through them one entry at a time (or through a small window of concurrent
//! entries). Each entry is fetched from its source, merged with the stored
//! state and committed in its own transaction. Failures of single entries are
//! collected into the run's report instead of aborting it.
//!
//! ## Components
//!
//! - **Entry Selector** (`selector`): Picks the candidates of a run by scope, categories and restrictions
//! - **Ranker** (`ranker`): Orders candidates by the configured strategy
//! - **Merger** (`merger`): Pure reconciliation of entries, episodes, tracker links and history
//! - **Schedule** (`schedule`): Fetch interval and next expected update of an entry
//! - **Sources** (`source`): The remote source contract and its error types
//! - **Run State Machine** (`job`): Lifecycle of a sync run with validated transitions
//! - **Registry** (`registry`): Single-flight slot for the active run
//! - **Orchestrator** (`orchestrator`): Drives runs and emits events
//! - **Reports** (`report`): Terminal summary of a run and the failure log
//! - **Restore** (`restore`): Applies exported entries with the same merge rules

pub mod collaborators;
pub mod error;
pub mod job;
pub mod merger;
pub mod orchestrator;
pub mod ranker;
pub mod registry;
pub mod report;
pub mod restore;
pub mod schedule;
pub mod selector;
pub mod source;

pub use collaborators::{DownloadQueue, ResultReporter, TrackerRefresh};
pub use error::{Result, SyncError};
pub use job::{RunId, RunProgress, RunState, SyncRun};
pub use merger::{merge_entry, merge_episodes, merge_history, merge_track_links, prepare_content};
pub use orchestrator::{RunOutcome, StartOutcome, SyncOrchestrator};
pub use ranker::rank;
pub use registry::{Admission, SyncRegistry};
pub use report::{
    EntryUpdate, FailureKind, FailureRecord, SyncReport, SystemicFailure, NO_CONTENT_MESSAGE,
    SOURCE_MISSING_MESSAGE,
};
pub use restore::{LibraryRestorer, RestoreBundle, RestoreOutcome};
pub use selector::{EntrySelector, ScopeFilter, Selection, SkipReason, SyncScope, SyncTarget};
pub use source::{ContentError, RawEpisode, RemoteSnapshot, RemoteSource, SourceError};
