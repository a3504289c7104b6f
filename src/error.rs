//! Centralized error types for mbox2pdf.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mbox2pdf library.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive could not be opened at all. Fatal for the run.
    #[error("Cannot read archive '{path}': {reason}")]
    ArchiveUnreadable { path: PathBuf, reason: String },

    /// A single record inside the archive is malformed.
    #[error("Corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    /// The MIME parser produced no structure for a record.
    #[error("Message could not be parsed: {0}")]
    MessageUnparseable(String),

    /// Writing a PDF failed.
    #[error("Cannot write PDF '{path}': {reason}")]
    Render { path: PathBuf, reason: String },

    /// An output directory could not be created.
    #[error("Cannot create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A font file could not be used for rendering.
    #[error("Unusable font: {0}")]
    Font(String),

    /// A batch glob pattern is malformed.
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Convenience alias for `Result<T, ConvertError>`.
pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `ArchiveUnreadable` variant.
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArchiveUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a `Render` variant from anything printable.
    pub fn render(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Render {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
