//! Entry point for the UI process: inbound requests and folder registration

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::config::LibraryConfig;
use crate::containment::{ContainmentChecker, ContainmentMatch, ContainmentMode};
use crate::db::CatalogStore;
use crate::error::LibraryError;
use crate::metadata::{LoftyExtractor, MetadataExtractor};
use crate::models::{DroppedFile, Folder, LibraryEntry, ScanMode, ScanReport, ScanRequest};
use crate::progress::{LibraryEvent, ProgressEmitter};
use crate::reconciler::Reconciler;
use crate::scheduler::{ScanScheduler, TimerHandle};

/// Inbound requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryRequest {
    RescanLibrary {
        #[serde(default)]
        forced: bool,
    },
    AddFoldersToLibrary {
        files: Vec<DroppedFile>,
    },
    AppReady,
}

/// Asks the user whether an overlapping registration should go ahead
pub trait OverlapPrompt: Send + Sync {
    fn confirm(&self, conflict: &ContainmentMatch) -> bool;
}

impl<F> OverlapPrompt for F
where
    F: Fn(&ContainmentMatch) -> bool + Send + Sync,
{
    fn confirm(&self, conflict: &ContainmentMatch) -> bool {
        self(conflict)
    }
}

pub struct LibraryEngine {
    store: Arc<CatalogStore>,
    emitter: Arc<ProgressEmitter>,
    scheduler: ScanScheduler,
    checker: ContainmentChecker,
    prompt: Box<dyn OverlapPrompt>,
}

impl LibraryEngine {
    /// Open the configured database and read tags with lofty
    pub fn open(config: LibraryConfig, prompt: impl OverlapPrompt + 'static) -> Result<Self, LibraryError> {
        let store = Arc::new(CatalogStore::open(&config.db_path)?);
        let extractor = Arc::new(LoftyExtractor::new(config.covers_dir.clone()));
        Self::with_parts(config, store, extractor, prompt)
    }

    pub fn with_parts(
        config: LibraryConfig,
        store: Arc<CatalogStore>,
        extractor: Arc<dyn MetadataExtractor>,
        prompt: impl OverlapPrompt + 'static,
    ) -> Result<Self, LibraryError> {
        let emitter = Arc::new(
            ProgressEmitter::new(config.event_capacity).with_loaded_debounce(config.loaded_debounce),
        );
        let checker = ContainmentChecker::new(ContainmentMode::from_segment_aware(
            config.segment_aware_containment,
        ));
        let interval = config.rescan_interval;
        let reconciler = Reconciler::new(config, Arc::clone(&store), Arc::clone(&emitter), extractor)?;

        Ok(Self {
            store,
            emitter,
            scheduler: ScanScheduler::new(reconciler, interval),
            checker,
            prompt: Box::new(prompt),
        })
    }

    pub fn subscribe(&self) -> Receiver<LibraryEvent> {
        self.emitter.subscribe()
    }

    pub fn scheduler(&self) -> &ScanScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn folders(&self) -> Result<Vec<Folder>, LibraryError> {
        Ok(self.store.folders()?)
    }

    pub fn library(&self) -> Result<Vec<LibraryEntry>, LibraryError> {
        Ok(self.store.library()?)
    }

    /// Dispatch one inbound request
    pub fn handle(&self, request: LibraryRequest) -> Result<(), LibraryError> {
        match request {
            LibraryRequest::RescanLibrary { forced } => {
                if !self.rescan(forced) {
                    log::info!("Rescan requested while scanning, ignored");
                }
                Ok(())
            }
            LibraryRequest::AddFoldersToLibrary { files } => self.add_folders(&files).map(|_| ()),
            LibraryRequest::AppReady => self.app_ready(),
        }
    }

    /// Send the current catalog to a freshly started UI
    pub fn app_ready(&self) -> Result<(), LibraryError> {
        let folders = self.store.folders()?;
        let library = self.store.library()?;
        log::info!(
            "UI ready, sending {} folders and {} songs",
            folders.len(),
            library.len()
        );
        self.emitter.publish(LibraryEvent::StoreFolders { folders });
        self.emitter.publish(LibraryEvent::StoreLibrary { library });
        Ok(())
    }

    /// Trigger a background rescan; `false` if one is already running
    pub fn rescan(&self, forced: bool) -> bool {
        self.scheduler
            .request(ScanRequest::with_mode(ScanMode::from_forced(forced)))
    }

    /// Rescan on the calling thread; `None` if one is already running
    pub fn rescan_blocking(&self, forced: bool) -> Option<Result<ScanReport, LibraryError>> {
        self.scheduler
            .run_now(ScanRequest::with_mode(ScanMode::from_forced(forced)))
    }

    pub fn start_timer(&self) -> Result<TimerHandle, LibraryError> {
        self.scheduler.start_timer()
    }

    /// Register folders and start scanning them in the background
    pub fn add_folders(&self, files: &[DroppedFile]) -> Result<Vec<Folder>, LibraryError> {
        let added = self.register_folders(files)?;
        if !added.is_empty() && !self.scheduler.request(ScanRequest::added(added.clone())) {
            log::info!("Scan in progress, new folders will be picked up by the next rescan");
        }
        Ok(added)
    }

    /// Register folders after the containment check, without scanning
    ///
    /// Returns `ContainmentConflict` with the matched registered path when the
    /// user declines an overlapping registration; nothing is registered then.
    pub fn register_folders(&self, files: &[DroppedFile]) -> Result<Vec<Folder>, LibraryError> {
        let candidates = self.resolve_candidates(files);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let registered = self.store.folders()?;
        let plan = match self.checker.check(&candidates, &registered) {
            Some(conflict) => {
                if !self.prompt.confirm(&conflict) {
                    log::info!(
                        "Registration of {} cancelled, overlaps {}",
                        conflict.candidate.display(),
                        conflict.matched.display()
                    );
                    return Err(LibraryError::containment_conflict(conflict.matched));
                }
                self.checker.merge(&candidates, &registered)
            }
            None => self.checker.merge(&candidates, &[]),
        };

        for skipped in &plan.skipped {
            log::warn!(
                "Not registering {}, already covered by {}",
                skipped.candidate.display(),
                skipped.matched.display()
            );
        }

        let added: Vec<Folder> = plan.register.into_iter().map(Folder::new).collect();
        self.store.apply_registration(&plan.replace, &added)?;
        for path in &plan.replace {
            log::info!("Folder {} merged into a new registration", path.display());
        }
        for folder in &added {
            log::info!("Added folder {}", folder.path.display());
        }

        if !added.is_empty() || !plan.replace.is_empty() {
            self.emitter.publish(LibraryEvent::FoldersAddedToLibrary {
                folders: added.clone(),
            });
            self.emitter.publish(LibraryEvent::StoreFolders {
                folders: self.store.folders()?,
            });
        }
        Ok(added)
    }

    /// Unregister a folder and drop its tracks from the catalog
    pub fn remove_folder(&self, path: &Path) -> Result<bool, LibraryError> {
        if !self.store.remove_folder(path)? {
            return Ok(false);
        }
        let removed = self.store.delete_entries_within(path)?;
        log::info!("Removed folder {} and {} songs", path.display(), removed);

        self.emitter.publish(LibraryEvent::StoreFolders {
            folders: self.store.folders()?,
        });
        let library = self.store.library()?;
        let count = library.len() as u64;
        self.emitter.publish(LibraryEvent::StoreLibrary { library });
        self.emitter.publish(LibraryEvent::LibrarySize { count });
        Ok(true)
    }

    /// Canonical directory paths, duplicates removed
    fn resolve_candidates(&self, files: &[DroppedFile]) -> Vec<PathBuf> {
        let mut paths = BTreeSet::new();
        for file in files {
            match resolve_folder(&file.path) {
                Ok(path) => {
                    paths.insert(path);
                }
                Err(e) => log::warn!("Ignoring dropped path: {}", e),
            }
        }
        paths.into_iter().collect()
    }
}

/// Canonicalize a dropped path, rejecting anything that is not a folder
fn resolve_folder(path: &Path) -> Result<PathBuf, LibraryError> {
    let resolved = path
        .canonicalize()
        .map_err(|e| LibraryError::invalid_path(path.to_path_buf(), e.to_string()))?;
    if !resolved.is_dir() {
        return Err(LibraryError::invalid_path(resolved, "not a folder"));
    }
    Ok(resolved)
}
