//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`, rooted in the platform cache
//!   directory reported by `dirs`
//! - `Clock` needs no desktop shim; use [`bridge_traits::SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::TokioFileSystem;
//! use std::sync::Arc;
//!
//! let fs = Arc::new(TokioFileSystem::new());
//! // hand `fs` to the sync orchestrator so failure logs land in the user cache dir
//! ```

mod filesystem;

pub use filesystem::TokioFileSystem;
