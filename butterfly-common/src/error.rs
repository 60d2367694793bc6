//! Error types for the butterfly-osm toolkit
//!
//! Every fatal condition of an extraction run is one variant of [`Error`].
//! Per-entity problems (a way the profile rejects, a restriction that cannot
//! be resolved) are never errors: they are counted and logged by the caller.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error as ThisError;

/// Main error type for butterfly-osm operations
#[derive(Debug, ThisError)]
pub enum Error {
    /// Corrupt block, bad XML, format signature mismatch or unsorted input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Routing profile missing or invalid
    #[error("Failed to load profile '{}': {reason}", path.display())]
    ProfileLoad { path: PathBuf, reason: String },

    /// Input variant not recognized
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Writing an output artifact failed
    #[error("Failed to write '{}': {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid configuration or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O error while reading input
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedInput(msg.into())
    }

    pub fn profile_load(path: &Path, reason: impl Into<String>) -> Self {
        Error::ProfileLoad {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn serialization(path: &Path, source: io::Error) -> Self {
        Error::Serialization {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for the kinds that stop the pipeline before any parsing begins
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::ProfileLoad { .. } | Error::UnsupportedFormat(_) | Error::InvalidInput(_)
        )
    }
}

/// Convenience result type for butterfly-osm operations
pub type Result<T> = std::result::Result<T, Error>;
