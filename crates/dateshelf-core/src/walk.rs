use std::fs;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::media;

/// Lazy, deterministic listing of the files under an input root.
#[derive(Debug, Clone)]
pub struct MediaWalk {
    root: PathBuf,
    max_depth: Option<usize>,
}

impl MediaWalk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: None,
        }
    }

    /// How many directory levels below the root to descend; `Some(0)` lists
    /// the root's own files only.
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn walker(&self) -> WalkDir {
        let walker = WalkDir::new(&self.root).sort_by_file_name();
        match self.max_depth {
            Some(depth) => walker.max_depth(depth.saturating_add(1)),
            None => walker,
        }
    }

    /// Regular files (and symlinks to them), sorted by name within each
    /// directory, minus OS clutter.
    pub fn files(&self) -> impl Iterator<Item = PathBuf> {
        self.walker()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read directory entry");
                    None
                }
            })
            .filter(is_file)
            .filter(|e| !media::is_ignored(&e.file_name().to_string_lossy()))
            .map(DirEntry::into_path)
    }
}

fn is_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}

/// Number of files a [`MediaWalk`] over `root` would yield.
pub fn count_files(root: &Path, max_depth: Option<usize>) -> u64 {
    MediaWalk::new(root).with_max_depth(max_depth).files().count() as u64
}

/// Remove empty directories below `root`, deepest first, down to
/// `max_depth` levels. The root itself is kept. Returns how many were
/// removed.
pub fn prune_empty_dirs(root: &Path, max_depth: Option<usize>) -> usize {
    let mut walker = WalkDir::new(root).min_depth(1).contents_first(true);
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }

    let mut removed = 0;
    for entry in walker.into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        match fs::remove_dir(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "deleted empty directory");
                removed += 1;
            }
            Err(e) => {
                tracing::info!(path = %path.display(), reason = %e, "directory not deleted");
            }
        }
    }
    removed
}
