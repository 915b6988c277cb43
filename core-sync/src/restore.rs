//! # Library Restore
//!
//! Applies an exported entry, with its episodes, tracker links, history and
//! category names, onto the local library using the same merge rules as a
//! sync.
//!
//! ## Overview
//!
//! Work happens in this order:
//! 1. Entry and episodes, committed in one transaction
//! 2. Tracker links, keyed by tracker id
//! 3. History, keyed by episode url
//! 4. Categories, matched by name and created when missing
//!
//! Each step writes only what differs from the stored state, so applying the
//! same bundle twice performs no writes the second time
//! ([`RestoreOutcome::is_noop`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! let restorer = LibraryRestorer::new(store, event_bus);
//! let outcome = restorer.restore(bundle).await?;
//! println!("{} episodes restored", outcome.episodes_inserted);
//! ```

use crate::merger::{merge_entry, merge_episodes, merge_history, merge_track_links};
use crate::source::RemoteSnapshot;
use crate::Result;
use core_library::{Episode, HistoryRecord, LibraryEntry, LibraryStore, TrackLink};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One exported entry and everything that belongs to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreBundle {
    /// Entry metadata; `version` should carry the exported entry's version.
    pub entry: RemoteSnapshot,
    pub episodes: Vec<Episode>,
    pub track_links: Vec<TrackLink>,
    /// History records; `episode_url` identifies the episode.
    pub history: Vec<HistoryRecord>,
    /// Category names the entry belonged to.
    pub categories: Vec<String>,
}

impl RestoreBundle {
    pub fn new(entry: RemoteSnapshot) -> Self {
        Self {
            entry,
            episodes: Vec::new(),
            track_links: Vec::new(),
            history: Vec::new(),
            categories: Vec::new(),
        }
    }
}

/// Writes performed by [`LibraryRestorer::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub entry_id: i64,
    pub entry_written: bool,
    pub episodes_inserted: usize,
    pub episodes_updated: usize,
    pub track_links_written: usize,
    pub history_written: usize,
    pub categories_created: usize,
    pub categories_added: usize,
}

impl RestoreOutcome {
    /// Whether the bundle was already fully reflected in the library.
    pub fn is_noop(&self) -> bool {
        !self.entry_written
            && self.episodes_inserted == 0
            && self.episodes_updated == 0
            && self.track_links_written == 0
            && self.history_written == 0
            && self.categories_created == 0
            && self.categories_added == 0
    }
}

pub struct LibraryRestorer {
    store: Arc<dyn LibraryStore>,
    event_bus: Arc<EventBus>,
}

impl LibraryRestorer {
    pub fn new(store: Arc<dyn LibraryStore>, event_bus: Arc<EventBus>) -> Self {
        Self { store, event_bus }
    }

    /// Merge `bundle` into the library.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Storage`] if any read or write fails. Steps
    /// that already committed stay committed.
    #[instrument(skip(self, bundle), fields(source_id = bundle.entry.source_id, url = %bundle.entry.url))]
    pub async fn restore(&self, bundle: RestoreBundle) -> Result<RestoreOutcome> {
        let mut outcome = RestoreOutcome::default();

        let local = self
            .store
            .find_by_identity(bundle.entry.source_id, &bundle.entry.url)
            .await?;
        let merged = merge_entry(local.as_ref(), &bundle.entry);
        let local_episodes = match &local {
            Some(entry) => self.store.episodes_for_entry(entry.id).await?,
            None => Vec::new(),
        };
        let changes = merge_episodes(&local_episodes, &bundle.episodes);
        outcome.episodes_updated = changes.to_update.len();

        let entry = match local {
            Some(local) if local == merged && changes.is_empty() => local,
            _ => {
                let committed = self.store.commit_entry_sync(&merged, &changes).await?;
                outcome.entry_written = true;
                outcome.episodes_inserted = committed.inserted.len();
                self.emit(LibraryEvent::EntryUpdated {
                    entry_id: committed.entry.id,
                    title: committed.entry.title.clone(),
                });
                if !committed.inserted.is_empty() {
                    self.emit(LibraryEvent::EpisodesAdded {
                        entry_id: committed.entry.id,
                        count: committed.inserted.len() as u64,
                    });
                }
                committed.entry
            }
        };
        outcome.entry_id = entry.id;

        outcome.track_links_written = self.restore_track_links(&entry, &bundle.track_links).await?;
        outcome.history_written = self.restore_history(&entry, &bundle.history).await?;
        let (created, added) = self.restore_categories(&entry, &bundle.categories).await?;
        outcome.categories_created = created;
        outcome.categories_added = added;

        if outcome.is_noop() {
            debug!(entry_id = entry.id, "Restore bundle already applied");
        } else {
            info!(
                entry_id = entry.id,
                episodes_inserted = outcome.episodes_inserted,
                episodes_updated = outcome.episodes_updated,
                track_links = outcome.track_links_written,
                history = outcome.history_written,
                "Restored library entry"
            );
        }

        Ok(outcome)
    }

    async fn restore_track_links(&self, entry: &LibraryEntry, remote: &[TrackLink]) -> Result<usize> {
        if remote.is_empty() {
            return Ok(0);
        }

        let local = self.store.track_links_for_entry(entry.id).await?;
        let (inserts, updates) = merge_track_links(entry.id, &local, remote);
        let count = inserts.len() + updates.len();
        if count > 0 {
            self.store.upsert_track_links(&inserts, &updates).await?;
            self.emit(LibraryEvent::TrackLinksUpdated {
                entry_id: entry.id,
                count: count as u64,
            });
        }
        Ok(count)
    }

    async fn restore_history(&self, entry: &LibraryEntry, remote: &[HistoryRecord]) -> Result<usize> {
        if remote.is_empty() {
            return Ok(0);
        }

        let episode_ids: HashMap<String, i64> = self
            .store
            .episodes_for_entry(entry.id)
            .await?
            .into_iter()
            .map(|episode| (episode.url, episode.id))
            .collect();
        let local = self.store.history_for_entry(entry.id).await?;
        let (inserts, updates) = merge_history(&local, remote, &episode_ids);

        let count = inserts.len() + updates.len();
        if count > 0 {
            self.store.upsert_history(&inserts, &updates).await?;
            self.emit(LibraryEvent::HistoryRestored {
                entry_id: entry.id,
                count: count as u64,
            });
        }
        Ok(count)
    }

    /// Returns `(created, added)`: categories created in the library and
    /// categories newly assigned to the entry.
    async fn restore_categories(&self, entry: &LibraryEntry, names: &[String]) -> Result<(usize, usize)> {
        if names.is_empty() {
            return Ok((0, 0));
        }

        let mut categories = self.store.list_categories().await?;
        let mut created = 0;
        let mut assigned = entry.categories.clone();
        let mut added = 0;

        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }

            let id = match categories.iter().find(|c| c.name == name) {
                Some(category) => category.id,
                None => {
                    let order = categories.iter().map(|c| c.order).max().unwrap_or(0) + 1;
                    let category = self.store.insert_category(name, order).await?;
                    created += 1;
                    let id = category.id;
                    categories.push(category);
                    id
                }
            };

            if id == core_library::DEFAULT_CATEGORY_ID || assigned.contains(&id) {
                continue;
            }
            assigned.push(id);
            added += 1;
        }

        if added > 0 {
            self.store.set_entry_categories(entry.id, &assigned).await?;
        }
        Ok((created, added))
    }

    fn emit(&self, event: LibraryEvent) {
        self.event_bus.emit(CoreEvent::Library(event)).ok();
    }
}
