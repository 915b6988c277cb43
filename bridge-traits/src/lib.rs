//! # Host Bridge Traits
//!
//! Capabilities the library sync engine consumes from its host but does not own.
//!
//! ## Overview
//!
//! The engine itself never reads the wall clock or touches the file system
//! directly. Both concerns go through the traits in this crate so that hosts
//! can inject platform-appropriate implementations and tests can pin time.
//!
//! ## Traits
//!
//! - [`Clock`](time::Clock) - Time source used for ranking, scheduling and report timestamps
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Where the failure log of a sync run is written
//!
//! ## Implementations
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Tests    | [`FixedClock`](time::FixedClock), in-memory mocks |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations should
//! convert platform errors into it and keep the offending path in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! per-entry tasks of a sync run.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::storage::FileSystemAccess;
//! use bridge_traits::error::Result;
//!
//! async fn write_report(fs: &dyn FileSystemAccess, body: String) -> Result<()> {
//!     let path = fs.get_cache_directory().await?.join("report.txt");
//!     fs.write_file(&path, body.into()).await
//! }
//! ```

pub mod error;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use storage::FileSystemAccess;
pub use time::{Clock, FixedClock, LogLevel, SystemClock};
