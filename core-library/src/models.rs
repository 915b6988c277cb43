//! Domain models for the tracked library
//!
//! Entries, their episodes, tracker links, viewing history and categories,
//! plus the small enums persisted alongside them as integer codes.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Category id every uncategorized entry implicitly belongs to.
pub const DEFAULT_CATEGORY_ID: i64 = 0;

// =============================================================================
// Enums
// =============================================================================

/// Publishing status reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Unknown,
    Ongoing,
    Completed,
    Licensed,
    PublishingFinished,
    Cancelled,
    OnHiatus,
}

impl EntryStatus {
    /// Integer code stored in the `entries.status` column.
    pub fn code(&self) -> i64 {
        match self {
            EntryStatus::Unknown => 0,
            EntryStatus::Ongoing => 1,
            EntryStatus::Completed => 2,
            EntryStatus::Licensed => 3,
            EntryStatus::PublishingFinished => 4,
            EntryStatus::Cancelled => 5,
            EntryStatus::OnHiatus => 6,
        }
    }

    /// Unknown codes map to [`EntryStatus::Unknown`].
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => EntryStatus::Ongoing,
            2 => EntryStatus::Completed,
            3 => EntryStatus::Licensed,
            4 => EntryStatus::PublishingFinished,
            5 => EntryStatus::Cancelled,
            6 => EntryStatus::OnHiatus,
            _ => EntryStatus::Unknown,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntryStatus::Unknown => "unknown",
            EntryStatus::Ongoing => "ongoing",
            EntryStatus::Completed => "completed",
            EntryStatus::Licensed => "licensed",
            EntryStatus::PublishingFinished => "publishing_finished",
            EntryStatus::Cancelled => "cancelled",
            EntryStatus::OnHiatus => "on_hiatus",
        };
        write!(f, "{}", label)
    }
}

/// Whether an entry keeps being refreshed after its first fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    #[default]
    AlwaysUpdate,
    OnlyFetchOnce,
}

impl UpdateStrategy {
    pub fn code(&self) -> i64 {
        match self {
            UpdateStrategy::AlwaysUpdate => 0,
            UpdateStrategy::OnlyFetchOnce => 1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => UpdateStrategy::OnlyFetchOnce,
            _ => UpdateStrategy::AlwaysUpdate,
        }
    }
}

/// What the content list of an entry is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchType {
    #[default]
    Episodes,
    Seasons,
}

impl FetchType {
    pub fn code(&self) -> i64 {
        match self {
            FetchType::Episodes => 0,
            FetchType::Seasons => 1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => FetchType::Seasons,
            _ => FetchType::Episodes,
        }
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// Episode counters derived from the `episodes` table, not stored on the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewingProgress {
    pub total: i64,
    pub unseen: i64,
}

impl ViewingProgress {
    pub fn seen(&self) -> i64 {
        self.total - self.unseen
    }

    pub fn has_started(&self) -> bool {
        self.seen() > 0
    }
}

/// A tracked title (anime or manga).
///
/// Identity is `(source_id, url)`; `id` is assigned by storage and is `0`
/// until the entry has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub status: EntryStatus,
    pub favorite: bool,
    /// True once a metadata fetch succeeded; never reset.
    pub initialized: bool,
    pub update_strategy: UpdateStrategy,
    pub fetch_type: FetchType,
    /// Season/part grouping.
    pub parent_id: Option<i64>,
    /// Unix millis of the last successful content sync, `0` if never.
    pub last_synced_at: i64,
    /// Unix millis of the next expected update, `0` if unknown.
    pub next_sync_at: i64,
    /// Days between updates. Negative values are a user override.
    pub fetch_interval: i32,
    pub date_added: i64,
    pub version: i64,
    pub categories: Vec<i64>,
    pub progress: ViewingProgress,
}

impl LibraryEntry {
    pub fn new(source_id: i64, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            source_id,
            url: url.into(),
            title: title.into(),
            author: None,
            artist: None,
            description: None,
            genre: Vec::new(),
            thumbnail_url: None,
            status: EntryStatus::Unknown,
            favorite: false,
            initialized: false,
            update_strategy: UpdateStrategy::AlwaysUpdate,
            fetch_type: FetchType::Episodes,
            parent_id: None,
            last_synced_at: 0,
            next_sync_at: 0,
            fetch_interval: 0,
            date_added: 0,
            version: 0,
            categories: Vec::new(),
            progress: ViewingProgress::default(),
        }
    }

    /// Category ids, with uncategorized entries reported as the default category.
    pub fn effective_categories(&self) -> Vec<i64> {
        if self.categories.is_empty() {
            vec![DEFAULT_CATEGORY_ID]
        } else {
            self.categories.clone()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("Entry url cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Entry title cannot be empty".to_string());
        }
        Ok(())
    }
}

/// A unit of content (episode or chapter) belonging to one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Episode {
    pub id: i64,
    pub entry_id: i64,
    /// Natural key within an entry.
    pub url: String,
    pub name: String,
    /// Float so sub-numbering like `10.5` survives.
    pub episode_number: f64,
    pub source_order: i64,
    pub date_upload: i64,
    pub date_fetch: i64,
    pub seen: bool,
    pub bookmark: bool,
    pub fillermark: bool,
    pub last_position_ms: i64,
    pub total_duration_ms: i64,
    pub scanlator: Option<String>,
    pub version: i64,
    pub last_modified_at: i64,
}

impl Episode {
    pub fn new(entry_id: i64, url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            entry_id,
            url: url.into(),
            name: name.into(),
            episode_number: -1.0,
            source_order: 0,
            date_upload: 0,
            date_fetch: 0,
            seen: false,
            bookmark: false,
            fillermark: false,
            last_position_ms: 0,
            total_duration_ms: 0,
            scanlator: None,
            version: 0,
            last_modified_at: 0,
        }
    }

    pub fn has_progress(&self) -> bool {
        self.last_position_ms > 0
    }
}

/// Association between an entry and an external tracking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TrackLink {
    pub id: i64,
    pub entry_id: i64,
    /// Tracking service id; natural key within an entry.
    pub tracker_id: i64,
    pub remote_id: i64,
    pub library_id: Option<i64>,
    pub title: String,
    pub last_episode_seen: f64,
    pub total_episodes: i64,
    pub status: i64,
    pub score: f64,
    pub remote_url: String,
}

impl TrackLink {
    pub fn new(entry_id: i64, tracker_id: i64, remote_id: i64) -> Self {
        Self {
            id: 0,
            entry_id,
            tracker_id,
            remote_id,
            library_id: None,
            title: String::new(),
            last_episode_seen: 0.0,
            total_episodes: 0,
            status: 0,
            score: 0.0,
            remote_url: String::new(),
        }
    }
}

/// Last time an episode was watched or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub episode_id: i64,
    /// Url of the episode; the natural key used when restoring.
    pub episode_url: String,
    pub seen_at: i64,
}

/// User-defined library category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "sort_order")]
    pub order: i64,
    pub flags: i64,
}

impl Category {
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_CATEGORY_ID
    }
}
