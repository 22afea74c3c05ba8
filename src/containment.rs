//! Overlap checks between candidate folders and registered folders
//!
//! A registered folder owns its whole subtree, so a candidate that equals,
//! contains, or sits inside a registered folder must be confirmed by the user
//! before registration goes ahead.
//!
//! The default comparison is a case-sensitive string prefix test, which also
//! treats `/music1` as overlapping `/music`. Component-aware comparison can be
//! enabled with [`ContainmentMode::Segments`].

use std::path::{Path, PathBuf};

use crate::models::{path_key, Folder};

/// How two paths are compared for overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainmentMode {
    /// Raw string prefix, platform separator untouched
    #[default]
    StringPrefix,
    /// Whole path components only
    Segments,
}

impl ContainmentMode {
    pub fn from_segment_aware(segment_aware: bool) -> Self {
        if segment_aware {
            ContainmentMode::Segments
        } else {
            ContainmentMode::StringPrefix
        }
    }

    /// Whether `inner` is equal to or lies inside `outer`
    pub fn is_within(&self, inner: &Path, outer: &Path) -> bool {
        match self {
            ContainmentMode::StringPrefix => path_key(inner).starts_with(&path_key(outer)),
            ContainmentMode::Segments => inner.starts_with(outer),
        }
    }

    /// Whether either path contains the other
    pub fn overlaps(&self, a: &Path, b: &Path) -> bool {
        self.is_within(a, b) || self.is_within(b, a)
    }
}

/// The first overlap found between a candidate and a registered folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentMatch {
    pub candidate: PathBuf,
    /// The registered folder the candidate collides with
    pub matched: PathBuf,
}

/// Validates candidate folders against the registered set
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainmentChecker {
    mode: ContainmentMode,
}

impl ContainmentChecker {
    pub fn new(mode: ContainmentMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ContainmentMode {
        self.mode
    }

    /// Find the first candidate that equals, contains, or is inside a registered folder
    pub fn check<P: AsRef<Path>>(
        &self,
        candidates: &[P],
        registered: &[Folder],
    ) -> Option<ContainmentMatch> {
        for candidate in candidates {
            let candidate = candidate.as_ref();
            for folder in registered {
                if self.mode.overlaps(candidate, &folder.path) {
                    return Some(ContainmentMatch {
                        candidate: candidate.to_path_buf(),
                        matched: folder.path.clone(),
                    });
                }
            }
        }
        None
    }

    /// Resolve an accepted overlap into the registrations to apply
    ///
    /// Candidates are collapsed to the outermost ones, candidates already covered
    /// by a registered ancestor are dropped, and registered folders inside a
    /// kept candidate are returned for removal.
    pub fn merge(&self, candidates: &[PathBuf], registered: &[Folder]) -> MergePlan {
        let mut sorted: Vec<&PathBuf> = candidates.iter().collect();
        sorted.sort_by_key(|p| path_key(p).len());

        let mut plan = MergePlan::default();
        for candidate in sorted {
            if plan
                .register
                .iter()
                .any(|kept| self.mode.is_within(candidate, kept))
            {
                continue;
            }
            if let Some(owner) = registered
                .iter()
                .find(|folder| self.mode.is_within(candidate, &folder.path))
            {
                if !candidate.starts_with(&owner.path) {
                    log::warn!(
                        "{} only shares a name prefix with {} and will not be scanned",
                        candidate.display(),
                        owner.path.display()
                    );
                }
                plan.skipped.push(ContainmentMatch {
                    candidate: candidate.clone(),
                    matched: owner.path.clone(),
                });
                continue;
            }
            plan.register.push(candidate.clone());
        }

        for folder in registered {
            if plan
                .register
                .iter()
                .any(|kept| self.mode.is_within(&folder.path, kept))
            {
                plan.replace.push(folder.path.clone());
            }
        }

        plan.register.sort();
        plan
    }
}

/// Outcome of merging confirmed candidates into the registered set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// New folders to register
    pub register: Vec<PathBuf>,
    /// Registered folders swallowed by a new registration
    pub replace: Vec<PathBuf>,
    /// Candidates left out because a registered folder already covers them
    pub skipped: Vec<ContainmentMatch>,
}
