//! Error types for the music catalog

use std::any::Any;
use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while maintaining the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryErrorKind {
    /// A file could not be parsed as audio
    ExtractionFailed,
    /// Stat, read or walk failure on a file or folder
    FilesystemAccess,
    /// A folder overlaps an already registered folder
    ContainmentConflict,
    /// Persistence layer failure
    Store,
    /// A dropped path that cannot be registered as a folder
    InvalidPath,
    /// A background worker could not be started or died
    Worker,
}

/// Represents an error raised by the catalog engine
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct LibraryError {
    /// The kind of error
    pub kind: LibraryErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl LibraryError {
    /// Create a new library error
    pub fn new(kind: LibraryErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create an extraction error for a single file
    pub fn extraction_failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::ExtractionFailed, Some(path), message)
    }

    /// Create a filesystem access error
    pub fn filesystem(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::FilesystemAccess, path, message)
    }

    /// Create a containment conflict carrying the matched registered path
    pub fn containment_conflict(matched: PathBuf) -> Self {
        Self::new(
            LibraryErrorKind::ContainmentConflict,
            Some(matched.clone()),
            format!("Overlaps registered folder {:?}", matched),
        )
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::Store, None, message)
    }

    /// Create an invalid path error
    pub fn invalid_path(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::InvalidPath, Some(path), message)
    }

    /// Create an error from a caught panic payload
    pub fn panicked(path: Option<PathBuf>, payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let kind = if path.is_some() {
            LibraryErrorKind::ExtractionFailed
        } else {
            LibraryErrorKind::Worker
        };
        Self::new(kind, path, format!("panicked: {}", detail))
    }

    /// Create a worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::Worker, None, message)
    }

    /// Attach a path to an error that was created without one
    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Whether this error must abort the whole scan job
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, LibraryErrorKind::Store | LibraryErrorKind::Worker)
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        Self::filesystem(None, err.to_string())
    }
}

impl From<walkdir::Error> for LibraryError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        Self::filesystem(path, err.to_string())
    }
}

impl From<rusqlite::Error> for LibraryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::store(err.to_string())
    }
}
