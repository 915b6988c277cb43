//! # Sync Reports
//!
//! Terminal summary of a run and the failure log written next to it.
//!
//! ## Failure Log Format
//!
//! Failures are grouped by message, then by source, one entry per line:
//!
//! ```text
//! ! No episodes found
//!   # Source A
//!     - Title 1
//!     - Title 2
//! ! Connection reset
//!   # Source B
//!     - Title 3
//! ```
//!
//! Writing the log is best-effort: any file system error is logged and the
//! report simply carries no location.

use bridge_traits::storage::FileSystemAccess;
use chrono::{DateTime, Utc};
use core_library::{Episode, LibraryEntry};
use core_runtime::config::RankingStrategy;
use core_runtime::logging::strip_path;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::job::{RunId, RunState};
use crate::selector::SyncScope;

/// Message recorded when a source lists no episodes.
pub const NO_CONTENT_MESSAGE: &str = "No episodes found";

/// Message recorded when an entry's source is not registered.
pub const SOURCE_MISSING_MESSAGE: &str = "Source not installed";

/// Why a single entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport, parse or timeout error from the source
    Fetch,
    /// The source listed no episodes
    NoContentFound,
    /// No source registered for the entry's source id
    SourceMissing,
    /// Reading or writing the library failed
    Storage,
    /// The entry's task panicked
    Unexpected,
}

/// One failed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub entry_id: i64,
    pub title: String,
    /// Source display name, or `#<id>` when the source is unknown
    pub source: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Storage failure that aborted the remainder of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemicFailure {
    pub message: String,
    /// Entries whose storage writes failed before the abort
    pub affected_entries: Vec<i64>,
}

/// An entry that received new episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub entry: LibraryEntry,
    /// Newest first
    pub new_episodes: Vec<Episode>,
}

impl EntryUpdate {
    pub fn new(entry: LibraryEntry, mut new_episodes: Vec<Episode>) -> Self {
        sort_newest_first(&mut new_episodes);
        Self {
            entry,
            new_episodes,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: RunId,
    pub scope: SyncScope,
    pub strategy: RankingStrategy,
    pub state: RunState,
    /// Selected entries, including entries merged in from other requests
    pub candidates: usize,
    /// Entries left out by restrictions
    pub skipped: usize,
    /// Entries dispatched before the run ended
    pub processed: usize,
    pub updates: Vec<EntryUpdate>,
    pub failures: Vec<FailureRecord>,
    pub systemic_failure: Option<SystemicFailure>,
    /// Whether any new episodes were handed to the download queue
    pub download_requested: bool,
    pub failure_log: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    /// A run without candidates; nothing is presented for it.
    pub fn is_silent(&self) -> bool {
        self.candidates == 0
    }

    pub fn new_episode_count(&self) -> usize {
        self.updates.iter().map(|u| u.new_episodes.len()).sum()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || self.systemic_failure.is_some()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Episode number descending, then source order ascending.
pub fn sort_newest_first(episodes: &mut [Episode]) {
    episodes.sort_by(|a, b| {
        b.episode_number
            .partial_cmp(&a.episode_number)
            .unwrap_or(Ordering::Equal)
            .then(a.source_order.cmp(&b.source_order))
    });
}

/// Render failures in the grouped log format.
pub fn format_failure_log(failures: &[FailureRecord]) -> String {
    let mut groups: Vec<(&str, Vec<(&str, Vec<&str>)>)> = Vec::new();

    for failure in failures {
        let index = match groups.iter().position(|(m, _)| *m == failure.message) {
            Some(index) => index,
            None => {
                groups.push((failure.message.as_str(), Vec::new()));
                groups.len() - 1
            }
        };
        let sources = &mut groups[index].1;
        match sources.iter_mut().find(|(s, _)| *s == failure.source) {
            Some((_, titles)) => titles.push(failure.title.as_str()),
            None => sources.push((failure.source.as_str(), vec![failure.title.as_str()])),
        }
    }

    let mut out = String::new();
    for (message, sources) in groups {
        out.push_str(&format!("! {}\n", message));
        for (source, titles) in sources {
            out.push_str(&format!("  # {}\n", source));
            for title in titles {
                out.push_str(&format!("    - {}\n", title));
            }
        }
    }
    out
}

/// Write the failure log into the cache directory.
///
/// Returns `None` when there is nothing to write or writing failed.
pub async fn write_failure_log(
    file_system: &dyn FileSystemAccess,
    file_name: &str,
    failures: &[FailureRecord],
) -> Option<PathBuf> {
    if failures.is_empty() {
        return None;
    }

    let dir = match file_system.get_cache_directory().await {
        Ok(dir) => dir,
        Err(e) => {
            warn!(error = %e, "Could not resolve cache directory for failure log");
            return None;
        }
    };

    if let Err(e) = file_system.create_dir_all(&dir).await {
        warn!(error = %e, path = %dir.display(), "Could not create failure log directory");
        return None;
    }

    let path = dir.join(file_name);
    let body = format_failure_log(failures);
    match file_system.write_file(&path, body.into()).await {
        Ok(()) => {
            debug!(
                file = strip_path(&path.to_string_lossy()),
                failures = failures.len(),
                "Wrote failure log"
            );
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Could not write failure log");
            None
        }
    }
}
