//! # Library Management Module
//!
//! Owns the local library database and the storage collaborator the sync
//! engine writes through.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Domain models for entries, episodes, tracker links, history and categories
//! - The [`LibraryStore`](repositories::LibraryStore) trait and its SQLite implementation

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{
    Category, Episode, EntryStatus, FetchType, HistoryRecord, LibraryEntry, TrackLink,
    UpdateStrategy, ViewingProgress, DEFAULT_CATEGORY_ID,
};
pub use repositories::{CommittedSync, EpisodeChanges, LibraryStore, SqliteLibraryStore};
