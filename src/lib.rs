//! Workspace facade crate.
//!
//! Re-exports the library sync crates so host applications can depend on
//! `tracker-workspace` alone. The `desktop-shims` feature (on by default)
//! adds the Tokio-backed bridge implementations from `bridge-desktop`.

pub use bridge_traits;
pub use core_library;
pub use core_runtime;
pub use core_sync;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
