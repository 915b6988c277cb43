//! # Sync Run State Machine
//!
//! Lifecycle of a single library sync run with validated state transitions.
//!
//! ## Overview
//!
//! A run is created `Idle`, selects and ranks its candidates, and then works
//! through them while `Running`. It ends in exactly one terminal state. Only the
//! orchestrator drives these transitions; hosts observe the latest snapshot via
//! `SyncOrchestrator::status`.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Selecting → Ranking → Running → Completed
//!          ↓            ↓         ↓
//!          └─────→ Failed ←───────┤
//!                                 └────→ Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncRun, SyncScope};
//!
//! let run = SyncRun::new(SyncScope::library(), clock.now());
//! let run = run.begin_selecting()?.begin_ranking()?;
//! let mut run = run.start(12)?;
//! run.record_progress(1, "Title")?;
//! let run = run.complete(clock.now())?;
//! ```

use crate::selector::SyncScope;
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a run ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidRunId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<RunId> for Uuid {
    fn from(id: RunId) -> Self {
        id.0
    }
}

// ============================================================================
// State Types
// ============================================================================

/// The current state of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Created, nothing selected yet
    Idle,
    /// Filtering the library down to candidates
    Selecting,
    /// Ordering the candidates
    Ranking,
    /// Working through the candidates
    Running,
    /// Every candidate was processed
    Completed,
    /// Stopped between entries on request
    Cancelled,
    /// Aborted by a systemic failure
    Failed,
}

impl RunState {
    /// Check if this state represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }

    /// Check if this state represents an active state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Selecting | RunState::Ranking | RunState::Running
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Selecting => "selecting",
            RunState::Ranking => "ranking",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        }
    }
}

impl FromStr for RunState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(RunState::Idle),
            "selecting" => Ok(RunState::Selecting),
            "ranking" => Ok(RunState::Ranking),
            "running" => Ok(RunState::Running),
            "completed" => Ok(RunState::Completed),
            "cancelled" => Ok(RunState::Cancelled),
            "failed" => Ok(RunState::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// Progress information for a running sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Candidates known to the run, including merged requests
    pub total: u64,
    /// Entries dispatched so far
    pub processed: u64,
    /// Entries that ended in a failure
    pub failed: u64,
    /// Title of the entry dispatched last
    pub current: Option<String>,
}

impl RunProgress {
    /// Percentage of dispatched entries, capped at 100
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).min(100.0) as u8
    }
}

// ============================================================================
// Sync Run Entity
// ============================================================================

/// Snapshot of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub scope: SyncScope,
    pub state: RunState,
    pub progress: RunProgress,
    /// Message of the systemic failure, if the run failed
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(scope: SyncScope, created_at: DateTime<Utc>) -> Self {
        Self::with_id(RunId::new(), scope, created_at)
    }

    pub fn with_id(id: RunId, scope: SyncScope, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            scope,
            state: RunState::Idle,
            progress: RunProgress::default(),
            error_message: None,
            created_at,
            finished_at: None,
        }
    }

    pub fn begin_selecting(self) -> Result<Self> {
        self.transition(RunState::Selecting)
    }

    pub fn begin_ranking(self) -> Result<Self> {
        self.transition(RunState::Ranking)
    }

    /// Enter `Running` with the ranked candidate count
    pub fn start(self, total: u64) -> Result<Self> {
        let mut run = self.transition(RunState::Running)?;
        run.progress.total = total;
        Ok(run)
    }

    /// Grow the candidate count after a request was merged into this run
    pub fn extend_total(&mut self, by: u64) -> Result<()> {
        self.require_running("extend_total")?;
        self.progress.total += by;
        Ok(())
    }

    /// Record that the entry at `index` (1-based) was dispatched
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not `Running`
    pub fn record_progress(&mut self, index: u64, title: &str) -> Result<()> {
        self.require_running("record_progress")?;
        self.progress.processed = index;
        self.progress.current = Some(title.to_string());
        Ok(())
    }

    pub fn record_failure(&mut self) {
        self.progress.failed += 1;
    }

    pub fn complete(self, at: DateTime<Utc>) -> Result<Self> {
        self.finish(RunState::Completed, at)
    }

    pub fn cancel(self, at: DateTime<Utc>) -> Result<Self> {
        self.finish(RunState::Cancelled, at)
    }

    pub fn fail(self, message: impl Into<String>, at: DateTime<Utc>) -> Result<Self> {
        let mut run = self.finish(RunState::Failed, at)?;
        run.error_message = Some(message.into());
        Ok(run)
    }

    /// Wall-clock duration of a finished run in milliseconds
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.created_at).num_milliseconds().max(0) as u64)
    }

    fn finish(self, to: RunState, at: DateTime<Utc>) -> Result<Self> {
        let mut run = self.transition(to)?;
        run.progress.current = None;
        run.finished_at = Some(at);
        Ok(run)
    }

    fn transition(mut self, to: RunState) -> Result<Self> {
        self.validate_transition(to)?;
        self.state = to;
        Ok(self)
    }

    fn require_running(&self, operation: &str) -> Result<()> {
        if self.state != RunState::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: operation.to_string(),
                reason: "Run must be running".to_string(),
            });
        }
        Ok(())
    }

    /// Validate a state transition
    fn validate_transition(&self, to: RunState) -> Result<()> {
        let valid = match (self.state, to) {
            (RunState::Idle, RunState::Selecting) => true,
            (RunState::Idle, RunState::Cancelled) => true,

            (RunState::Selecting, RunState::Ranking) => true,
            (RunState::Selecting, RunState::Failed) => true,
            (RunState::Selecting, RunState::Cancelled) => true,

            (RunState::Ranking, RunState::Running) => true,
            (RunState::Ranking, RunState::Failed) => true,
            (RunState::Ranking, RunState::Cancelled) => true,

            (RunState::Running, RunState::Completed) => true,
            (RunState::Running, RunState::Cancelled) => true,
            (RunState::Running, RunState::Failed) => true,

            // Terminal states cannot transition
            (RunState::Completed, _) => false,
            (RunState::Cancelled, _) => false,
            (RunState::Failed, _) => false,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.state.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
