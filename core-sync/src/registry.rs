//! Single-flight registry of the active sync run.
//!
//! Holds at most one active run. Admission is check-and-set under one lock, so
//! two triggers racing to start a run end up as one run plus one merged
//! request. Only requests for the active run's target are merged; a request
//! for another target is turned away so it never runs under the wrong target. Each orchestrator owns its registry (or shares one explicitly), so
//! tests never observe each other's runs.

use core_library::LibraryEntry;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::job::RunId;
use crate::selector::SyncTarget;

struct ActiveRun {
    run_id: RunId,
    target: SyncTarget,
    cancellation_token: CancellationToken,
    /// Every entry id this run has been asked to process
    known: HashSet<i64>,
    /// Merged entries not yet picked up by the run loop
    pending: Vec<LibraryEntry>,
}

/// Result of [`SyncRegistry::admit`].
#[derive(Debug, Clone)]
pub enum Admission {
    /// The caller now owns the active run.
    Started(CancellationToken),
    /// Another run was active; new candidates were queued on it.
    Merged { run_id: RunId, queued: usize },
    /// Another run with a different target was active; nothing was queued.
    Busy { run_id: RunId, target: SyncTarget },
}

#[derive(Default)]
pub struct SyncRegistry {
    active: Mutex<Option<ActiveRun>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `run_id` with `candidates`, or queue them on the active run.
    ///
    /// Queuing skips entries the active run already knows about.
    pub async fn admit(&self, run_id: RunId, target: SyncTarget, candidates: &[LibraryEntry]) -> Admission {
        let mut active = self.active.lock().await;

        if let Some(run) = active.as_mut() {
            if run.target != target {
                debug!(run_id = %run.run_id, active = %run.target, requested = %target, "Active run has another target");
                return Admission::Busy {
                    run_id: run.run_id,
                    target: run.target,
                };
            }

            let mut queued = 0;
            for entry in candidates {
                if run.known.insert(entry.id) {
                    run.pending.push(entry.clone());
                    queued += 1;
                }
            }
            debug!(run_id = %run.run_id, queued, "Merged request into active run");
            return Admission::Merged {
                run_id: run.run_id,
                queued,
            };
        }

        let cancellation_token = CancellationToken::new();
        *active = Some(ActiveRun {
            run_id,
            target,
            cancellation_token: cancellation_token.clone(),
            known: candidates.iter().map(|e| e.id).collect(),
            pending: Vec::new(),
        });
        Admission::Started(cancellation_token)
    }

    /// Take merged entries, or release the slot when there are none.
    ///
    /// An empty result means `run_id` is no longer active and later requests
    /// will start a new run.
    pub async fn drain_or_release(&self, run_id: RunId) -> Vec<LibraryEntry> {
        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(run) if run.run_id == run_id => {
                if run.pending.is_empty() {
                    *active = None;
                    Vec::new()
                } else {
                    std::mem::take(&mut run.pending)
                }
            }
            _ => Vec::new(),
        }
    }

    /// Release the slot of `run_id`, dropping anything still queued.
    pub async fn release(&self, run_id: RunId) -> usize {
        let mut active = self.active.lock().await;
        match active.as_ref() {
            Some(run) if run.run_id == run_id => {
                let dropped = run.pending.len();
                *active = None;
                dropped
            }
            _ => 0,
        }
    }

    /// Signal the active run to stop between entries.
    pub async fn cancel_active(&self) -> Option<RunId> {
        let active = self.active.lock().await;
        active.as_ref().map(|run| {
            run.cancellation_token.cancel();
            run.run_id
        })
    }

    pub async fn active_run(&self) -> Option<RunId> {
        self.active.lock().await.as_ref().map(|run| run.run_id)
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
