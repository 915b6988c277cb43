//! # Reconciliation Merger
//!
//! Merges remote snapshots into locally persisted state without losing
//! user-owned data.
//!
//! ## Overview
//!
//! Every function here is pure: it takes local and remote records and returns
//! what should be written. Storage decides how.
//!
//! - [`merge_entry`] overwrites descriptive metadata from the remote side while
//!   `favorite` and `initialized` are OR'd, so they never go back to `false`.
//!   A snapshot that carries a version only wins when it is strictly newer.
//! - [`merge_episodes`] matches by url and partitions the result into inserts
//!   and updates. Seen state and playback progress never regress, and rows
//!   whose merged form equals the stored one produce no write.
//! - [`merge_track_links`] and [`merge_history`] apply the same max discipline
//!   keyed by tracker id and episode url.
//! - [`prepare_content`] turns a raw source listing into episode rows. Upload
//!   dates the source does not know stay `0` until [`merge_episodes`] decides
//!   the row is new.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let entry = merge_entry(Some(&local_entry), &snapshot);
//! let prepared = prepare_content(raw, entry.id, now_ms);
//! let changes = merge_episodes(&local_episodes, &prepared);
//! store.commit_entry_sync(&entry, &changes).await?;
//! ```

use core_library::{Episode, EpisodeChanges, HistoryRecord, LibraryEntry, TrackLink};
use std::collections::{HashMap, HashSet};

use crate::source::{RawEpisode, RemoteSnapshot};

// ============================================================================
// Entries
// ============================================================================

/// Produce the entry to persist for a remote snapshot.
///
/// Without a local entry the snapshot is mapped as-is and `initialized`
/// reflects whether a description is known.
pub fn merge_entry(local: Option<&LibraryEntry>, remote: &RemoteSnapshot) -> LibraryEntry {
    let Some(local) = local else {
        return new_entry(remote);
    };

    let remote_is_stale = matches!(remote.version, Some(v) if v <= local.version);

    let mut merged = if remote_is_stale {
        local.clone()
    } else {
        overwrite_from_remote(local, remote)
    };

    merged.favorite = local.favorite || remote.favorite;
    merged.initialized = local.initialized || remote.initialized;
    merged
}

fn new_entry(remote: &RemoteSnapshot) -> LibraryEntry {
    let mut entry = LibraryEntry::new(remote.source_id, remote.url.clone(), remote.title.clone());
    entry.author = remote.author.clone();
    entry.artist = remote.artist.clone();
    entry.description = remote.description.clone();
    entry.genre = remote.genre.clone().unwrap_or_default();
    entry.thumbnail_url = remote.thumbnail_url.clone().filter(|url| !url.is_empty());
    entry.status = remote.status;
    entry.favorite = remote.favorite;
    entry.initialized = remote.description.is_some();
    if let Some(strategy) = remote.update_strategy {
        entry.update_strategy = strategy;
    }
    if let Some(fetch_type) = remote.fetch_type {
        entry.fetch_type = fetch_type;
    }
    entry.parent_id = remote.parent_id;
    entry.version = remote.version.unwrap_or_default();
    entry
}

fn overwrite_from_remote(local: &LibraryEntry, remote: &RemoteSnapshot) -> LibraryEntry {
    let mut merged = local.clone();

    if !remote.title.trim().is_empty() {
        merged.title = remote.title.clone();
    }
    if remote.author.is_some() {
        merged.author = remote.author.clone();
    }
    if remote.artist.is_some() {
        merged.artist = remote.artist.clone();
    }
    if remote.description.is_some() {
        merged.description = remote.description.clone();
    }
    if let Some(genre) = &remote.genre {
        merged.genre = genre.clone();
    }
    // An empty cover never replaces a known one
    if let Some(thumbnail) = remote.thumbnail_url.as_ref().filter(|url| !url.is_empty()) {
        merged.thumbnail_url = Some(thumbnail.clone());
    }
    merged.status = remote.status;
    if let Some(strategy) = remote.update_strategy {
        merged.update_strategy = strategy;
    }
    if let Some(fetch_type) = remote.fetch_type {
        merged.fetch_type = fetch_type;
    }
    if remote.parent_id.is_some() {
        merged.parent_id = remote.parent_id;
    }
    if let Some(version) = remote.version {
        merged.version = version;
    }

    merged
}

// ============================================================================
// Episodes
// ============================================================================

/// Turn a raw listing into episode rows for `entry_id`.
///
/// Duplicate urls keep their first occurrence. `source_order` is the list
/// position and `date_fetch` counts down from `now_ms + len`, so rows listed
/// first (newest, by source convention) get the larger fetch timestamp.
/// Upload dates are copied as-is, `0` when the source has none.
pub fn prepare_content(raw: Vec<RawEpisode>, entry_id: i64, now_ms: i64) -> Vec<Episode> {
    let mut seen_urls = HashSet::new();
    let unique: Vec<RawEpisode> = raw
        .into_iter()
        .filter(|episode| seen_urls.insert(episode.url.clone()))
        .collect();

    let count = unique.len() as i64;

    unique
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let index = index as i64;
            let mut episode = Episode::new(entry_id, raw.url, raw.name);
            episode.episode_number = raw.episode_number;
            episode.source_order = index;
            episode.scanlator = raw.scanlator;
            episode.date_fetch = now_ms + (count - index);
            episode.date_upload = raw.date_upload.max(0);
            episode.last_modified_at = now_ms;
            episode
        })
        .collect()
}

/// Reconcile `remote` episodes against `local` ones, keyed by url.
///
/// Remote episodes with an empty url cannot be matched and are always
/// inserted. Local episodes missing from `remote` are left alone.
///
/// Inserted rows without an upload date take the largest upload date of the
/// inserts listed above them, or their fetch timestamp when there is none.
/// Updated rows keep their stored upload date unless the remote one is known.
pub fn merge_episodes(local: &[Episode], remote: &[Episode]) -> EpisodeChanges {
    let by_url: HashMap<&str, &Episode> = local
        .iter()
        .filter(|episode| !episode.url.is_empty())
        .map(|episode| (episode.url.as_str(), episode))
        .collect();

    let mut changes = EpisodeChanges::default();

    for incoming in remote {
        let existing = if incoming.url.is_empty() {
            None
        } else {
            by_url.get(incoming.url.as_str()).copied()
        };

        match existing {
            None => changes.to_insert.push(incoming.clone()),
            Some(stored) => {
                let merged = merge_episode(stored, incoming);
                if !same_content(stored, &merged) {
                    changes.to_update.push(merged);
                }
            }
        }
    }

    fill_upload_dates(&mut changes.to_insert);
    changes
}

fn fill_upload_dates(inserts: &mut [Episode]) {
    let mut max_upload = 0_i64;
    for episode in inserts {
        if episode.date_upload > 0 {
            max_upload = max_upload.max(episode.date_upload);
        } else if max_upload > 0 {
            episode.date_upload = max_upload;
        } else {
            episode.date_upload = episode.date_fetch;
        }
    }
}

/// Remote fields on the stored row's identity, with user state preserved.
fn merge_episode(local: &Episode, remote: &Episode) -> Episode {
    let mut merged = remote.clone();
    merged.id = local.id;
    merged.entry_id = local.entry_id;
    merged.version = local.version;
    merged.date_fetch = local.date_fetch;
    if remote.date_upload == 0 {
        merged.date_upload = local.date_upload;
    }

    merged.bookmark = local.bookmark || remote.bookmark;
    merged.fillermark = local.fillermark || remote.fillermark;
    merged.total_duration_ms = local.total_duration_ms.max(remote.total_duration_ms);

    if local.seen && !remote.seen {
        merged.seen = true;
        merged.last_position_ms = local.last_position_ms;
    } else {
        merged.last_position_ms = local.last_position_ms.max(remote.last_position_ms);
    }

    merged
}

/// Equality ignoring identity, fetch timestamps and version.
fn same_content(a: &Episode, b: &Episode) -> bool {
    a.url == b.url
        && a.name == b.name
        && a.episode_number == b.episode_number
        && a.source_order == b.source_order
        && a.seen == b.seen
        && a.bookmark == b.bookmark
        && a.fillermark == b.fillermark
        && a.last_position_ms == b.last_position_ms
        && a.total_duration_ms == b.total_duration_ms
        && a.scanlator == b.scanlator
        && a.date_upload == b.date_upload
}

// ============================================================================
// Track Links & History
// ============================================================================

/// Reconcile tracker links of `entry_id`, keyed by tracker id.
///
/// Returns `(inserts, updates)`. Progress and total are the maximum of both
/// sides; status and score follow the remote service; remote ids and urls fill
/// in when present.
pub fn merge_track_links(
    entry_id: i64,
    local: &[TrackLink],
    remote: &[TrackLink],
) -> (Vec<TrackLink>, Vec<TrackLink>) {
    let by_tracker: HashMap<i64, &TrackLink> =
        local.iter().map(|link| (link.tracker_id, link)).collect();

    let mut inserts: Vec<TrackLink> = Vec::new();
    let mut updates = Vec::new();

    for incoming in remote {
        match by_tracker.get(&incoming.tracker_id) {
            None => {
                if inserts.iter().any(|l| l.tracker_id == incoming.tracker_id) {
                    continue;
                }
                let mut link = incoming.clone();
                link.id = 0;
                link.entry_id = entry_id;
                inserts.push(link);
            }
            Some(stored) => {
                let mut merged = (*stored).clone();
                if incoming.remote_id != 0 {
                    merged.remote_id = incoming.remote_id;
                }
                if incoming.library_id.is_some() {
                    merged.library_id = incoming.library_id;
                }
                if !incoming.title.is_empty() {
                    merged.title = incoming.title.clone();
                }
                if !incoming.remote_url.is_empty() {
                    merged.remote_url = incoming.remote_url.clone();
                }
                merged.last_episode_seen = stored.last_episode_seen.max(incoming.last_episode_seen);
                merged.total_episodes = stored.total_episodes.max(incoming.total_episodes);
                merged.status = incoming.status;
                merged.score = incoming.score;

                if merged != **stored {
                    updates.push(merged);
                }
            }
        }
    }

    (inserts, updates)
}

/// Reconcile history records, keyed by episode url.
///
/// `episode_ids` maps urls of the entry's stored episodes to their ids;
/// incoming records for unknown urls are dropped. Returns `(inserts, updates)`
/// where updates only ever move `seen_at` forward.
pub fn merge_history(
    local: &[HistoryRecord],
    remote: &[HistoryRecord],
    episode_ids: &HashMap<String, i64>,
) -> (Vec<HistoryRecord>, Vec<HistoryRecord>) {
    let by_url: HashMap<&str, &HistoryRecord> = local
        .iter()
        .map(|record| (record.episode_url.as_str(), record))
        .collect();

    let mut inserts: Vec<HistoryRecord> = Vec::new();
    let mut updates: Vec<HistoryRecord> = Vec::new();

    for incoming in remote {
        match by_url.get(incoming.episode_url.as_str()) {
            Some(stored) => {
                if incoming.seen_at <= stored.seen_at {
                    continue;
                }
                match updates.iter_mut().find(|r| r.id == stored.id) {
                    Some(pending) => pending.seen_at = pending.seen_at.max(incoming.seen_at),
                    None => updates.push(HistoryRecord {
                        seen_at: incoming.seen_at,
                        ..(*stored).clone()
                    }),
                }
            }
            None => {
                let Some(&episode_id) = episode_ids.get(&incoming.episode_url) else {
                    continue;
                };
                match inserts.iter_mut().find(|r| r.episode_id == episode_id) {
                    Some(pending) => pending.seen_at = pending.seen_at.max(incoming.seen_at),
                    None => inserts.push(HistoryRecord {
                        id: 0,
                        episode_id,
                        episode_url: incoming.episode_url.clone(),
                        seen_at: incoming.seen_at,
                    }),
                }
            }
        }
    }

    (inserts, updates)
}
