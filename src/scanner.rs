//! Scanner module - walks a registered folder and extracts candidate tracks

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::LibraryConfig;
use crate::error::LibraryError;
use crate::metadata::MetadataExtractor;
use crate::models::{system_time_ms, LibraryEntry};
use crate::progress::{LibraryEvent, ProgressEmitter};

/// Modification time of a folder in milliseconds since the epoch
pub fn folder_mtime_ms(path: &Path) -> Result<i64, LibraryError> {
    let metadata = std::fs::metadata(path).map_err(|e| LibraryError::from(e).at(path))?;
    if !metadata.is_dir() {
        return Err(LibraryError::filesystem(
            Some(path.to_path_buf()),
            "registered folder is not a directory",
        ));
    }
    let modified = metadata
        .modified()
        .map_err(|e| LibraryError::from(e).at(path))?;
    Ok(system_time_ms(modified))
}

/// Walks folders, announcing every directory and file it visits
pub struct DirectoryScanner<'a> {
    config: &'a LibraryConfig,
    emitter: &'a ProgressEmitter,
}

impl<'a> DirectoryScanner<'a> {
    pub fn new(config: &'a LibraryConfig, emitter: &'a ProgressEmitter) -> Self {
        Self { config, emitter }
    }

    /// Lazily walk `root`; every call starts a fresh traversal
    pub fn scan(&self, root: &Path) -> FolderWalk<'a> {
        let config = self.config;
        let walker = WalkDir::new(root)
            .follow_links(config.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || entry
                        .file_name()
                        .to_str()
                        .map(|name| !config.should_ignore_dir(name))
                        .unwrap_or(true)
            });

        FolderWalk {
            walker: Box::new(walker),
            config,
            emitter: self.emitter,
            errors: Vec::new(),
        }
    }

    /// Walk `root` and extract tags for every candidate file
    ///
    /// A panicking extractor counts as a failed extraction for that file.
    pub fn collect(&self, root: &Path, extractor: &dyn MetadataExtractor) -> FolderScan {
        let mut walk = self.scan(root);
        let mut scan = FolderScan::default();

        for path in walk.by_ref() {
            let extracted = catch_unwind(AssertUnwindSafe(|| extractor.extract(&path)))
                .unwrap_or_else(|payload| {
                    Err(LibraryError::panicked(Some(path.clone()), payload.as_ref()))
                });
            match extracted {
                Ok(tags) => scan.entries.push(LibraryEntry::new(path, tags)),
                Err(e) => {
                    log::debug!("Skipping {}: {}", path.display(), e.message);
                    scan.extraction_failures += 1;
                }
            }
        }

        scan.errors = walk.take_errors();
        scan
    }
}

type Walker<'a> = Box<dyn Iterator<Item = walkdir::Result<walkdir::DirEntry>> + 'a>;

/// Iterator over candidate audio paths in one folder subtree
pub struct FolderWalk<'a> {
    walker: Walker<'a>,
    config: &'a LibraryConfig,
    emitter: &'a ProgressEmitter,
    errors: Vec<LibraryError>,
}

impl FolderWalk<'_> {
    /// Filesystem errors met so far
    pub fn take_errors(&mut self) -> Vec<LibraryError> {
        std::mem::take(&mut self.errors)
    }
}

impl Iterator for FolderWalk<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Walk error: {}", e);
                    self.errors.push(e.into());
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                self.emitter.publish(LibraryEvent::ScanningFolder {
                    path: path.to_path_buf(),
                });
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            self.emitter.publish(LibraryEvent::ScanningFile {
                path: path.to_path_buf(),
            });

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            if self.config.should_include_extension(extension) {
                return Some(entry.into_path());
            }
        }
    }
}

/// Output of scanning one folder
#[derive(Debug, Default)]
pub struct FolderScan {
    pub entries: Vec<LibraryEntry>,
    pub extraction_failures: u64,
    pub errors: Vec<LibraryError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackTags;
    use std::fs;

    fn title_from_contents(path: &Path) -> Result<TrackTags, LibraryError> {
        let text = fs::read_to_string(path)?;
        if text == "corrupt" {
            return Err(LibraryError::extraction_failed(path.to_path_buf(), "bad header"));
        }
        Ok(TrackTags {
            title: Some(text),
            ..Default::default()
        })
    }

    fn drain(rx: &std::sync::mpsc::Receiver<LibraryEvent>) -> Vec<LibraryEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_walk_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("c.mp3"), "c").unwrap();
        fs::write(root.join("a.flac"), "a").unwrap();
        fs::write(root.join("cover.jpg"), "img").unwrap();
        fs::write(root.join("b/d.mp3"), "d").unwrap();
        fs::write(root.join(".hidden/e.mp3"), "e").unwrap();

        let config = LibraryConfig::builder().extensions(["mp3", "flac"]).build();
        let emitter = ProgressEmitter::new(64);
        let scanner = DirectoryScanner::new(&config, &emitter);

        let paths: Vec<PathBuf> = scanner.scan(root).collect();
        assert_eq!(
            paths,
            vec![root.join("a.flac"), root.join("b/d.mp3"), root.join("c.mp3")]
        );

        // Restartable: a second walk yields the same sequence.
        let again: Vec<PathBuf> = scanner.scan(root).collect();
        assert_eq!(paths, again);
    }

    #[test]
    fn test_walk_emits_folder_and_file_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.mp3"), "a").unwrap();
        fs::write(root.join("notes.txt"), "n").unwrap();
        fs::write(root.join("sub/b.mp3"), "b").unwrap();

        let config = LibraryConfig::default();
        let emitter = ProgressEmitter::new(64);
        let rx = emitter.subscribe();
        let scanner = DirectoryScanner::new(&config, &emitter);
        let _: Vec<_> = scanner.scan(root).collect();

        let events = drain(&rx);
        assert_eq!(
            events,
            vec![
                LibraryEvent::ScanningFolder { path: root.to_path_buf() },
                LibraryEvent::ScanningFile { path: root.join("a.mp3") },
                LibraryEvent::ScanningFile { path: root.join("notes.txt") },
                LibraryEvent::ScanningFolder { path: root.join("sub") },
                LibraryEvent::ScanningFile { path: root.join("sub/b.mp3") },
            ]
        );
    }

    #[test]
    fn test_collect_skips_extraction_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("bad.mp3"), "corrupt").unwrap();
        fs::write(root.join("good.mp3"), "Good").unwrap();

        let config = LibraryConfig::default();
        let emitter = ProgressEmitter::new(64);
        let scanner = DirectoryScanner::new(&config, &emitter);
        let scan = scanner.collect(root, &title_from_contents);

        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.entries[0].title(), Some("Good"));
        assert_eq!(scan.extraction_failures, 1);
        assert!(scan.errors.is_empty());
    }

    #[test]
    fn test_default_config_offers_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["a.mp3", "b.m4b", "c.aif", "cover.jpg"] {
            fs::write(root.join(name), name).unwrap();
        }

        let config = LibraryConfig::default();
        let emitter = ProgressEmitter::new(64);
        let scanner = DirectoryScanner::new(&config, &emitter);
        let paths: Vec<PathBuf> = scanner.scan(root).collect();
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn test_panicking_extractor_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.mp3"), "boom").unwrap();
        fs::write(root.join("b.mp3"), "Fine").unwrap();

        let extractor = |path: &Path| -> Result<TrackTags, LibraryError> {
            if fs::read_to_string(path)? == "boom" {
                panic!("decoder blew up");
            }
            title_from_contents(path)
        };
        let config = LibraryConfig::default();
        let emitter = ProgressEmitter::new(64);
        let scanner = DirectoryScanner::new(&config, &emitter);
        let scan = scanner.collect(root, &extractor);

        assert_eq!(scan.extraction_failures, 1);
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.entries[0].title(), Some("Fine"));
    }

    #[test]
    fn test_missing_root_reports_error() {
        let config = LibraryConfig::default();
        let emitter = ProgressEmitter::new(4);
        let scanner = DirectoryScanner::new(&config, &emitter);
        let scan = scanner.collect(Path::new("/definitely/not/here"), &title_from_contents);

        assert!(scan.entries.is_empty());
        assert_eq!(scan.errors.len(), 1);
    }

    #[test]
    fn test_folder_mtime() {
        let dir = tempfile::tempdir().unwrap();
        assert!(folder_mtime_ms(dir.path()).unwrap() > 0);

        let file = dir.path().join("a.mp3");
        fs::write(&file, "a").unwrap();
        assert!(folder_mtime_ms(&file).is_err());
        assert!(folder_mtime_ms(&dir.path().join("missing")).is_err());
    }
}
