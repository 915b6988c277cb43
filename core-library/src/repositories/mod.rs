//! # Repository Pattern Implementation
//!
//! Storage collaborator consumed by the sync engine.
//!
//! ## Architecture
//!
//! - [`LibraryStore`] defines the interface; the engine only ever sees `Arc<dyn LibraryStore>`
//! - [`SqliteLibraryStore`] implements it with `sqlx` on a `SqlitePool`
//! - Every call is one transaction; [`LibraryStore::commit_entry_sync`] groups an
//!   entry and its episode changes so they land all-or-nothing

pub mod library;

pub use library::{CommittedSync, EpisodeChanges, LibraryStore, SqliteLibraryStore};
