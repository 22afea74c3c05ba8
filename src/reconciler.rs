//! Brings the catalog in line with what is on disk
//!
//! One run selects folders, scans them on a bounded worker pool, upserts
//! the extracted tracks, commits folder timestamps, sweeps the whole catalog
//! for entries whose file is gone, and finally publishes the settled library.

use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;
use std::time::Instant;

use crate::config::LibraryConfig;
use crate::db::CatalogStore;
use crate::error::LibraryError;
use crate::metadata::MetadataExtractor;
use crate::models::{Folder, LibraryEntry, ScanJob, ScanMode, ScanReport, ScanRequest, SelectedFolder};
use crate::progress::{LibraryEvent, ProgressEmitter};
use crate::scanner::{folder_mtime_ms, DirectoryScanner};

/// Result of scanning and committing one folder
#[derive(Debug, Default)]
struct FolderOutcome {
    entries: Vec<LibraryEntry>,
    extraction_failures: u64,
    /// Walk errors, plus a store error if one ended the folder
    errors: Vec<LibraryError>,
}

pub struct Reconciler {
    config: LibraryConfig,
    store: Arc<CatalogStore>,
    emitter: Arc<ProgressEmitter>,
    extractor: Arc<dyn MetadataExtractor>,
    pool: ThreadPool,
}

impl Reconciler {
    pub fn new(
        config: LibraryConfig,
        store: Arc<CatalogStore>,
        emitter: Arc<ProgressEmitter>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Self, LibraryError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_threads())
            .thread_name(|i| format!("scan-worker-{}", i))
            .build()
            .map_err(|e| LibraryError::worker(e.to_string()))?;

        Ok(Self {
            config,
            store,
            emitter,
            extractor,
            pool,
        })
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn emitter(&self) -> &Arc<ProgressEmitter> {
        &self.emitter
    }

    /// Pick the folders this run will scan, reading each mtime once
    ///
    /// Folders that cannot be statted are recorded in the report and left out.
    pub fn select_folders(
        &self,
        request: &ScanRequest,
        report: &mut ScanReport,
    ) -> Result<Vec<SelectedFolder>, LibraryError> {
        let candidates = match &request.targets {
            Some(targets) => targets.clone(),
            None => self.store.folders()?,
        };

        let mut selected = Vec::new();
        for folder in candidates {
            match folder_mtime_ms(&folder.path) {
                Ok(mtime) => {
                    if request.mode == ScanMode::Forced || mtime > folder.last_modified {
                        selected.push(SelectedFolder {
                            folder,
                            observed_mtime: mtime,
                        });
                    } else {
                        log::debug!("Unchanged since last scan: {}", folder.path.display());
                        report.folders_skipped += 1;
                    }
                }
                Err(e) => {
                    log::warn!("Cannot stat {}: {}", folder.path.display(), e.message);
                    report.folders_failed += 1;
                    report.errors.push(e);
                }
            }
        }
        Ok(selected)
    }

    /// Run one complete reconciliation
    pub fn reconcile(&self, request: &ScanRequest) -> Result<ScanReport, LibraryError> {
        let start = Instant::now();
        let mut report = ScanReport::new(request.mode);
        log::info!(
            "Scanning library {}...",
            match request.mode {
                ScanMode::Forced => "completely",
                ScanMode::Incremental => "wisely",
            }
        );

        let selected = self.select_folders(request, &mut report)?;
        let mut job = ScanJob::new(request.mode, selected);
        job.announce_added = request.targets.is_some();
        report.folders_scanned = job.target_folders.len() as u64;

        let outcomes: Vec<FolderOutcome> = self.pool.install(|| {
            job.target_folders
                .par_iter()
                .map(|selected| self.scan_folder(selected))
                .collect()
        });

        let mut fatal = None;
        for outcome in outcomes {
            report.tracks_upserted += outcome.entries.len() as u64;
            report.extraction_failures += outcome.extraction_failures;
            if !outcome.errors.is_empty() {
                report.folders_failed += 1;
            }
            for error in outcome.errors {
                if error.is_fatal() && fatal.is_none() {
                    fatal = Some(error);
                } else {
                    report.errors.push(error);
                }
            }
            if job.announce_added {
                job.candidates.extend(outcome.entries);
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        log::info!("Updated {} track metadata", report.tracks_upserted);

        report.tracks_removed = self.sweep_orphans()?;

        let library = self.store.library()?;
        report.library_size = library.len() as u64;
        report.duration_ms = start.elapsed().as_millis() as u64;

        if job.announce_added {
            self.emitter.publish(LibraryEvent::TracksAddedToLibrary {
                tracks: std::mem::take(&mut job.candidates),
            });
        }
        log::info!("Sending library of {} songs", library.len());
        self.emitter.publish(LibraryEvent::StoreLibrary { library });
        self.emitter.publish(LibraryEvent::LibrarySize {
            count: report.library_size,
        });

        Ok(report)
    }

    /// Scan one folder, upsert what it yields and commit its timestamp
    fn scan_folder(&self, selected: &SelectedFolder) -> FolderOutcome {
        let folder = &selected.folder;
        let scanner = DirectoryScanner::new(&self.config, &self.emitter);
        let scan = scanner.collect(&folder.path, self.extractor.as_ref());

        let mut outcome = FolderOutcome {
            extraction_failures: scan.extraction_failures,
            errors: scan.errors,
            ..Default::default()
        };

        if let Err(e) = self.store.upsert_entries(&scan.entries) {
            log::error!("Failed to store tracks of {}: {}", folder.path.display(), e);
            outcome
                .errors
                .push(LibraryError::from(e).at(folder.path.as_path()));
            return outcome;
        }
        outcome.entries = scan.entries;

        if outcome.errors.is_empty() {
            if let Err(e) = self.commit_folder(folder, selected.observed_mtime) {
                outcome.errors.push(e.at(folder.path.as_path()));
            }
        } else {
            log::warn!(
                "{} filesystem errors under {}, timestamp kept",
                outcome.errors.len(),
                folder.path.display()
            );
        }
        outcome
    }

    fn commit_folder(&self, folder: &Folder, observed_mtime: i64) -> Result<(), LibraryError> {
        self.store
            .set_folder_last_modified(&folder.path, observed_mtime)?;
        Ok(())
    }

    /// Remove every catalog entry whose file no longer exists
    ///
    /// Covers the whole catalog, not only the folders scanned this run.
    pub fn sweep_orphans(&self) -> Result<u64, LibraryError> {
        let paths = self.store.library_paths()?;
        let total = paths.len();
        let mut removed = 0u64;

        for path in paths {
            match path.try_exists() {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("Removing non existent {}", path.display());
                    self.store.delete_entry(&path)?;
                    removed += 1;
                }
                Err(e) => {
                    log::warn!("Cannot check {}, keeping it: {}", path.display(), e);
                }
            }
        }

        log::info!("Removed {} of {} songs", removed, total);
        Ok(removed)
    }
}
