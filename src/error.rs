//! Centralized error types for uatshell.
//!
//! Lookup misses are not errors: an unknown message-id or search term comes
//! back as `None` or an empty result. Everything here is either an I/O
//! problem or a structural problem with the archive itself.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the uatshell library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive directory does not exist.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    /// A required file is missing or the archive failed a consistency check.
    #[error("Invalid archive '{path}': {reason}")]
    InvalidArchive { path: PathBuf, reason: String },

    /// An index was past the end of the store it addresses.
    #[error("Index {index} out of range (store holds {len} entries)")]
    OutOfRange { index: u64, len: u64 },

    /// A single record could not be decoded (decompression error or size mismatch).
    #[error("Failed to decode message {index}: {reason}")]
    DecodeFailure { index: u32, reason: String },

    /// Writing an archive failed.
    #[error("Build error: {0}")]
    BuildError(String),
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `InvalidArchive` variant.
    pub fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an `OutOfRange` variant.
    pub fn out_of_range(index: impl Into<u64>, len: usize) -> Self {
        Self::OutOfRange {
            index: index.into(),
            len: len as u64,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `ArchiveError::io`).
impl From<std::io::Error> for ArchiveError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
