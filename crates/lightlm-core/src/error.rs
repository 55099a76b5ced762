//! Error types shared by every lightlm crate.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Engine error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Corpus is missing, unreadable or empty after pruning.
    #[error("corpus error: {}: {message}", path.display())]
    Corpus {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid hyperparameter or container request.
    #[error("invalid configuration: {field}: {message}")]
    Config { field: String, message: String },

    /// Out-of-range container access.
    #[error("index {index} out of bounds for {what} of length {len}")]
    Bounds {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// Vector length does not match the container it is combined with.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Corrupt or incompatible model artifact.
    #[error("invalid model artifact: {0}")]
    Format(String),

    /// I/O error from an underlying file or stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a corpus error for `path`.
    pub fn corpus(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Error::Corpus {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a corpus error wrapping the I/O failure that caused it.
    pub fn corpus_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Corpus {
            path: path.as_ref().to_path_buf(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a configuration error naming the offending field.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a bounds error.
    pub fn bounds(what: &'static str, index: usize, len: usize) -> Self {
        Error::Bounds { what, index, len }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Error::DimensionMismatch { expected, actual }
    }

    /// Create a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    /// Get error category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Corpus { .. } => "corpus",
            Error::Config { .. } => "config",
            Error::Bounds { .. } | Error::DimensionMismatch { .. } => "bounds",
            Error::Format(_) => "format",
            Error::Io(_) => "io",
        }
    }
}
