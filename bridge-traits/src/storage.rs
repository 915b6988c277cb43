//! File system access for the failure log.
//!
//! A sync run that recorded failures writes one plain-text log into the host's
//! cache directory and hands its location to the reporter. Hosts without a
//! writable file system simply do not configure an implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Host file system, scoped to what the engine writes.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn save(fs: &dyn FileSystemAccess, body: String) -> Result<PathBuf> {
///     let path = fs.get_cache_directory().await?.join("library_update_errors.txt");
///     fs.write_file(&path, body.into()).await?;
///     Ok(path)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Directory for files the system may purge, such as failure logs.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write `data` to `path`, replacing any previous content.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;
}
