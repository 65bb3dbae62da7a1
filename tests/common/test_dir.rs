//! TestDir builder for watched directories

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory the server watches
///
/// Files live directly in `root/watched` so tests can remove the watched
/// directory itself while the temp dir stays around.
pub struct TestDir {
    dir: TempDir,
    root: PathBuf,
}

impl TestDir {
    /// Create a new empty watched directory
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path().join("watched");
        fs::create_dir(&root).expect("Failed to create watched dir");
        Self { dir, root }
    }

    /// Path of the watched directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path as the server advertises it
    pub fn path_str(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    /// Add a file with the given content
    pub fn add_file(&self, name: &str, content: &str) -> &Self {
        fs::write(self.root.join(name), content).expect("Failed to write file");
        self
    }

    /// Add `count` files named `{prefix}{i:03}`
    pub fn add_files(&self, prefix: &str, count: usize) -> &Self {
        for i in 0..count {
            self.add_file(&format!("{prefix}{i:03}"), "");
        }
        self
    }

    /// Append bytes to an existing file
    pub fn append(&self, name: &str, content: &str) -> &Self {
        let path = self.root.join(name);
        let mut existing = fs::read(&path).expect("Failed to read file");
        existing.extend_from_slice(content.as_bytes());
        fs::write(&path, existing).expect("Failed to append to file");
        self
    }

    pub fn set_mode(&self, name: &str, mode: u32) -> &Self {
        fs::set_permissions(self.root.join(name), fs::Permissions::from_mode(mode))
            .expect("Failed to set permissions");
        self
    }

    pub fn remove_file(&self, name: &str) -> &Self {
        fs::remove_file(self.root.join(name)).expect("Failed to remove file");
        self
    }

    /// Delete the watched directory itself
    pub fn remove_root(&self) {
        fs::remove_dir_all(&self.root).expect("Failed to remove watched dir");
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
