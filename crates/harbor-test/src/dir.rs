//! Extension directory fixture.

use std::path::{Path, PathBuf};

use harbor_core::ExtensionManifest;
use tempfile::TempDir;

/// A temporary extension directory, removed on drop.
#[derive(Debug)]
pub struct ExtensionDirFixture {
    dir: TempDir,
}

impl Default for ExtensionDirFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionDirFixture {
    /// An empty directory.
    ///
    /// # Panics
    ///
    /// If the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create extension dir"),
        }
    }

    /// The directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `manifest` to `<id>.json` and return its path.
    ///
    /// # Panics
    ///
    /// If the file cannot be written.
    pub fn write(&self, manifest: &ExtensionManifest) -> PathBuf {
        let json = manifest.to_json().expect("serialize manifest");
        self.write_raw(&format!("{}.json", manifest.id), &json)
    }

    /// Write `content` to `file_name` and return its path.
    ///
    /// # Panics
    ///
    /// If the file cannot be written.
    pub fn write_raw(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(file_name);
        std::fs::write(&path, content).expect("write manifest");
        path
    }

    /// Delete `file_name`.
    ///
    /// # Panics
    ///
    /// If the file cannot be removed.
    pub fn remove(&self, file_name: &str) {
        std::fs::remove_file(self.dir.path().join(file_name)).expect("remove manifest");
    }

    /// Whether `file_name` exists.
    #[must_use]
    pub fn contains(&self, file_name: &str) -> bool {
        self.dir.path().join(file_name).is_file()
    }
}
