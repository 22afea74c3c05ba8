//! Configuration for the catalog engine

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default periodic rescan interval (one hour)
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default quiet period before `APP_LOADED` fires
pub const DEFAULT_LOADED_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default per-subscriber event queue capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default database file name
pub const DEFAULT_DB_FILE: &str = "music_catalog.db";

/// Configuration for the catalog engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// SQLite database path
    pub db_path: PathBuf,

    /// Extensions to hand to the extractor (whitelist)
    /// Empty by default: every file is offered and the extractor decides
    pub extensions: HashSet<String>,

    /// Directory names to ignore
    pub ignore_dirs: HashSet<String>,

    /// Whether to follow symbolic links while walking
    pub follow_links: bool,

    /// Number of folders scanned in parallel
    /// 0 means auto-detect (CPU cores)
    pub num_threads: usize,

    /// Period of the self-triggered incremental rescan
    pub rescan_interval: Duration,

    /// Quiet period for the derived `APP_LOADED` notification
    pub loaded_debounce: Duration,

    /// Capacity of each subscriber's event queue
    pub event_capacity: usize,

    /// Where extracted cover images are cached
    /// Covers are not written when unset
    pub covers_dir: Option<PathBuf>,

    /// Compare folders by path components instead of raw string prefix
    pub segment_aware_containment: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            extensions: HashSet::new(),
            ignore_dirs: Self::default_ignore_dirs(),
            follow_links: false,
            num_threads: 0,
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
            loaded_debounce: DEFAULT_LOADED_DEBOUNCE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            covers_dir: None,
            segment_aware_containment: false,
        }
    }
}

impl LibraryConfig {
    /// Create a config builder
    pub fn builder() -> LibraryConfigBuilder {
        LibraryConfigBuilder::new()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            "@eaDir",
            "node_modules",
            "__pycache__",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if an extension should be handed to the extractor
    pub fn should_include_extension(&self, ext: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a directory should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Get the effective number of worker threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }
}

/// Builder for LibraryConfig
#[derive(Debug, Default)]
pub struct LibraryConfigBuilder {
    config: LibraryConfig,
}

impl LibraryConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = path;
        self
    }

    /// Restrict the extractor to these extensions (case-insensitive)
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// Set the directories to ignore
    pub fn ignore_dirs(mut self, dirs: HashSet<String>) -> Self {
        self.config.ignore_dirs = dirs;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Enable or disable following symlinks
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.config.follow_links = enabled;
        self
    }

    /// Set the number of threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the periodic rescan interval
    pub fn rescan_interval(mut self, interval: Duration) -> Self {
        self.config.rescan_interval = interval;
        self
    }

    /// Set the `APP_LOADED` quiet period
    pub fn loaded_debounce(mut self, delay: Duration) -> Self {
        self.config.loaded_debounce = delay;
        self
    }

    /// Set the per-subscriber event queue capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Set the cover cache directory
    pub fn covers_dir(mut self, dir: PathBuf) -> Self {
        self.config.covers_dir = Some(dir);
        self
    }

    /// Use path-component containment instead of string prefixes
    pub fn segment_aware_containment(mut self, enabled: bool) -> Self {
        self.config.segment_aware_containment = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> LibraryConfig {
        self.config
    }
}
