//! Core data models for the catalog

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::LibraryError;

/// A registered library folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    /// Absolute folder path
    pub path: PathBuf,
    /// Folder mtime (ms since epoch) observed at the last successful scan
    pub last_modified: i64,
}

impl Folder {
    /// A freshly registered folder that has never been scanned
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: 0,
        }
    }
}

/// Tags returned by a metadata extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub disk: Option<u32>,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub genre: Option<String>,
    /// Path of the cached cover image
    pub picture: Option<String>,
    pub track: Option<u32>,
    pub year: Option<u32>,
}

/// A track record in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    /// Absolute file path
    pub path: PathBuf,
    #[serde(flatten)]
    pub tags: TrackTags,
}

impl LibraryEntry {
    /// Create an entry from extracted tags
    pub fn new(path: impl Into<PathBuf>, tags: TrackTags) -> Self {
        Self {
            path: path.into(),
            tags,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.tags.title.as_deref()
    }

    pub fn artist(&self) -> Option<&str> {
        self.tags.artist.as_deref()
    }
}

/// A file or folder handed over by the UI for registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedFile {
    #[serde(default)]
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub last_modified: i64,
}

impl DroppedFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name,
            path,
            last_modified: 0,
        }
    }
}

/// Scan mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Only folders whose mtime advanced since their last scan
    #[default]
    Incremental,
    /// Every registered folder
    Forced,
}

impl ScanMode {
    pub fn from_forced(forced: bool) -> Self {
        if forced {
            ScanMode::Forced
        } else {
            ScanMode::Incremental
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Incremental => "incremental",
            ScanMode::Forced => "forced",
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a scan job should cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub mode: ScanMode,
    /// Explicit folders to scan; `None` selects from the registered set
    pub targets: Option<Vec<Folder>>,
}

impl ScanRequest {
    /// Scan over the registered folders
    pub fn with_mode(mode: ScanMode) -> Self {
        Self {
            mode,
            targets: None,
        }
    }

    pub fn incremental() -> Self {
        Self::with_mode(ScanMode::Incremental)
    }

    pub fn forced() -> Self {
        Self::with_mode(ScanMode::Forced)
    }

    /// Forced scan of newly registered folders
    pub fn added(folders: Vec<Folder>) -> Self {
        Self {
            mode: ScanMode::Forced,
            targets: Some(folders),
        }
    }
}

/// A folder picked for this run, with the mtime read at selection time
#[derive(Debug, Clone)]
pub struct SelectedFolder {
    pub folder: Folder,
    pub observed_mtime: i64,
}

/// Ephemeral state of one scan run
#[derive(Debug)]
pub struct ScanJob {
    pub mode: ScanMode,
    pub target_folders: Vec<SelectedFolder>,
    pub candidates: Vec<LibraryEntry>,
    /// Announce the extracted tracks with `TRACKS_ADDED_TO_LIBRARY`
    pub announce_added: bool,
}

impl ScanJob {
    pub fn new(mode: ScanMode, target_folders: Vec<SelectedFolder>) -> Self {
        Self {
            mode,
            target_folders,
            candidates: Vec::new(),
            announce_added: false,
        }
    }
}

/// Result of a scan job
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub mode: ScanMode,
    /// Folders selected for scanning
    pub folders_scanned: u64,
    /// Folders left alone because their mtime did not advance
    pub folders_skipped: u64,
    /// Folders whose scan hit a filesystem error
    pub folders_failed: u64,
    /// Candidate records written to the store
    pub tracks_upserted: u64,
    /// Files that could not be parsed as audio
    pub extraction_failures: u64,
    /// Records removed by the orphan sweep
    pub tracks_removed: u64,
    /// Catalog size after the sweep
    pub library_size: u64,
    /// Folder- and file-level filesystem errors
    #[serde(skip)]
    pub errors: Vec<LibraryError>,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Milliseconds since the Unix epoch for a filesystem timestamp
pub fn system_time_ms(time: std::time::SystemTime) -> i64 {
    chrono::DateTime::<chrono::Utc>::from(time).timestamp_millis()
}

/// Path rendered for storage and comparison
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
