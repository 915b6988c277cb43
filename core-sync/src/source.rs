//! # Remote Sources
//!
//! The catalog side of a sync: something that can describe an entry and list
//! its episodes.
//!
//! ## Overview
//!
//! Sources are registered on the orchestrator by id. Every fetch either yields
//! data or a [`SourceError`]; timeouts are the source's own business and are
//! surfaced as [`SourceError::Timeout`]. An empty content list is not a
//! transport error, but it is not a success either: [`into_content`] turns it
//! into [`ContentError::NoContentFound`] so the per-entry pipeline can match on
//! it instead of unwinding.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::source::{into_content, ContentError};
//!
//! match into_content(source.fetch_content_list(&entry).await) {
//!     Ok(episodes) => { /* reconcile */ }
//!     Err(ContentError::NoContentFound) => { /* user-facing "no episodes" */ }
//!     Err(ContentError::Transport(e)) => { /* raw error message */ }
//! }
//! ```

use async_trait::async_trait;
use core_library::{EntryStatus, FetchType, LibraryEntry, UpdateStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single request against a remote source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("{0}")]
    Transport(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
}

/// Outcome of classifying a content-list fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// The source answered with an empty list.
    #[error("No episodes found")]
    NoContentFound,

    #[error(transparent)]
    Transport(#[from] SourceError),
}

/// Map an empty content list to [`ContentError::NoContentFound`].
pub fn into_content(
    result: Result<Vec<RawEpisode>, SourceError>,
) -> Result<Vec<RawEpisode>, ContentError> {
    match result {
        Ok(episodes) if episodes.is_empty() => Err(ContentError::NoContentFound),
        Ok(episodes) => Ok(episodes),
        Err(e) => Err(ContentError::Transport(e)),
    }
}

/// Metadata of an entry as reported by a remote side.
///
/// Sources leave `version` unset; restore bundles carry the version of the
/// exported entry so the merge can decide which side is newer. Optional fields
/// left as `None` keep the local value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Option<Vec<String>>,
    pub thumbnail_url: Option<String>,
    pub status: EntryStatus,
    pub favorite: bool,
    pub initialized: bool,
    pub update_strategy: Option<UpdateStrategy>,
    pub fetch_type: Option<FetchType>,
    pub parent_id: Option<i64>,
    pub version: Option<i64>,
}

impl RemoteSnapshot {
    pub fn new(source_id: i64, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id,
            url: url.into(),
            title: title.into(),
            author: None,
            artist: None,
            description: None,
            genre: None,
            thumbnail_url: None,
            status: EntryStatus::Unknown,
            favorite: false,
            initialized: false,
            update_strategy: None,
            fetch_type: None,
            parent_id: None,
            version: None,
        }
    }

    /// Snapshot of a stored entry, carrying its version.
    ///
    /// This is the shape an exported entry takes inside a restore bundle.
    pub fn from_entry(entry: &LibraryEntry) -> Self {
        Self {
            source_id: entry.source_id,
            url: entry.url.clone(),
            title: entry.title.clone(),
            author: entry.author.clone(),
            artist: entry.artist.clone(),
            description: entry.description.clone(),
            genre: Some(entry.genre.clone()),
            thumbnail_url: entry.thumbnail_url.clone(),
            status: entry.status,
            favorite: entry.favorite,
            initialized: entry.initialized,
            update_strategy: Some(entry.update_strategy),
            fetch_type: Some(entry.fetch_type),
            parent_id: entry.parent_id,
            version: Some(entry.version),
        }
    }
}

/// One episode as listed by a source, before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEpisode {
    pub url: String,
    pub name: String,
    /// `-1.0` when the source does not number its episodes.
    pub episode_number: f64,
    /// Unix millis, `0` when unknown.
    pub date_upload: i64,
    pub scanlator: Option<String>,
}

impl RawEpisode {
    pub fn new(url: impl Into<String>, name: impl Into<String>, episode_number: f64) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            episode_number,
            date_upload: 0,
            scanlator: None,
        }
    }
}

/// A remote catalog for one source id.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn id(&self) -> i64;

    /// Display name, used in failure reports.
    fn name(&self) -> String;

    async fn fetch_metadata(&self, entry: &LibraryEntry) -> Result<RemoteSnapshot, SourceError>;

    /// Episodes in source order, newest first by convention.
    async fn fetch_content_list(&self, entry: &LibraryEntry)
        -> Result<Vec<RawEpisode>, SourceError>;
}
