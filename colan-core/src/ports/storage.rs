//! File storage path resolution.

use std::path::{Path, PathBuf};

pub trait StorageResolver: Send + Sync {
    /// Absolute path for a storage-relative path.
    fn absolute_path(&self, relative: &str) -> PathBuf;

    /// Root of the media file tree.
    fn root(&self) -> &Path;
}

/// Plain directory-rooted storage.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StorageResolver for DirStorage {
    fn absolute_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
