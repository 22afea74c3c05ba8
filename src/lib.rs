//! Music library catalog with incremental folder rescans
//!
//! Registered folders are walked in parallel with rayon and walkdir, tags are
//! read with lofty and the catalog lives in SQLite. Every change is published
//! as a stream of [`LibraryEvent`]s for the UI.

pub mod config;
pub mod containment;
pub mod db;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod reconciler;
pub mod scanner;
pub mod scheduler;

pub use config::LibraryConfig;
pub use containment::{ContainmentChecker, ContainmentMatch, ContainmentMode, MergePlan};
pub use db::CatalogStore;
pub use engine::{LibraryEngine, LibraryRequest, OverlapPrompt};
pub use error::{LibraryError, LibraryErrorKind};
pub use metadata::{LoftyExtractor, MetadataExtractor};
pub use models::{DroppedFile, Folder, LibraryEntry, ScanMode, ScanReport, ScanRequest, TrackTags};
pub use progress::{LibraryEvent, ProgressEmitter, ProgressReporter};
pub use reconciler::Reconciler;
pub use scanner::DirectoryScanner;
pub use scheduler::{ScanScheduler, SchedulerState, TimerHandle};
