//! Error types for stitch

use thiserror::Error;

use crate::UploadId;

#[derive(Error, Debug)]
pub enum StitchError {
    #[error("Upload not found: {id}")]
    NotFound { id: UploadId },

    #[error("Upload already finalized: {id}")]
    AlreadyFinalized { id: UploadId },

    #[error("Upload not finalized yet: {id}")]
    NotReady { id: UploadId },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid upload id: {0}")]
    InvalidId(String),
}

/// Coarse classification of [`StitchError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyFinalized,
    NotReady,
    StorageUnavailable,
    InvalidId,
}

impl ErrorKind {
    /// Machine-readable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyFinalized => "already_finalized",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::InvalidId => "invalid_id",
        }
    }
}

impl StitchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StitchError::NotFound { .. } => ErrorKind::NotFound,
            StitchError::AlreadyFinalized { .. } => ErrorKind::AlreadyFinalized,
            StitchError::NotReady { .. } => ErrorKind::NotReady,
            StitchError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            StitchError::InvalidId(_) => ErrorKind::InvalidId,
        }
    }

    /// Wrap any storage-layer failure with a short description of the step that failed
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        StitchError::StorageUnavailable(format!("{}: {}", context, err))
    }
}

impl From<std::io::Error> for StitchError {
    fn from(err: std::io::Error) -> Self {
        StitchError::StorageUnavailable(err.to_string())
    }
}
