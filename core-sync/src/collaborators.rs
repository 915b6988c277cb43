//! Side-effect collaborators of a sync run.
//!
//! These are the seams to the download queue, tracker services and the
//! presentation layer. None of them can fail a run: download requests are
//! fire-and-forget, tracker errors are logged and dropped, and reporter
//! callbacks return nothing.

use async_trait::async_trait;
use core_library::{Episode, LibraryEntry, TrackLink};
use std::path::Path;

use crate::report::SyncReport;
use crate::source::SourceError;

/// Receives new episodes that qualified for automatic download.
///
/// Called from the run loop; implementations must only enqueue.
pub trait DownloadQueue: Send + Sync {
    fn request_download(&self, entry: &LibraryEntry, episodes: &[Episode]);
}

/// Fetches the current state of an entry's links on external trackers.
#[async_trait]
pub trait TrackerRefresh: Send + Sync {
    async fn refresh(&self, entry: &LibraryEntry) -> Result<Vec<TrackLink>, SourceError>;
}

/// Presentation-layer observer of a run.
pub trait ResultReporter: Send + Sync {
    /// An entry is about to be processed; `index` is 1-based.
    fn on_progress(&self, index: usize, total: usize, entry: &LibraryEntry);

    /// The run reached a terminal state with at least one candidate.
    fn on_completed(&self, report: &SyncReport);

    /// The failure log of the run was written to `location`.
    fn on_failures_written(&self, location: &Path);
}
