use crate::source::SourceError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid run ID: {0}")]
    InvalidRunId(String),

    #[error("Invalid run state: {0}")]
    InvalidStatus(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(err: core_runtime::Error) -> Self {
        match err {
            core_runtime::Error::Config(msg) => SyncError::Config(msg),
            core_runtime::Error::Internal(msg) => SyncError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
