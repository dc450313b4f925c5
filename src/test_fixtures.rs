// Keepsake backup system.

//! Utilities to set up test environments.
//!
//! Fixtures that create directories delete them when dropped.

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tempfile::TempDir;

/// A temporary directory tree for a test, deleted on drop.
pub struct TreeFixture {
    pub root: PathBuf,
    _tempdir: TempDir,
}

impl TreeFixture {
    pub fn new() -> TreeFixture {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().to_path_buf();
        TreeFixture {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn create_file(&self, relative_path: &str) {
        self.create_file_with_content(relative_path, b"contents");
    }

    pub fn create_file_with_content(&self, relative_path: &str, content: &[u8]) {
        fs::write(self.root.join(relative_path), content).unwrap();
    }

    pub fn create_dir(&self, relative_path: &str) {
        fs::create_dir_all(self.root.join(relative_path)).unwrap();
    }

    #[cfg(unix)]
    pub fn create_symlink(&self, relative_path: &str, target: &str) {
        std::os::unix::fs::symlink(target, self.root.join(relative_path)).unwrap();
    }

    /// Pin a file's mtime so size/mtime comparisons are deterministic.
    pub fn set_mtime(&self, relative_path: &str, unix_seconds: i64) {
        filetime::set_file_mtime(
            self.root.join(relative_path),
            FileTime::from_unix_time(unix_seconds, 0),
        )
        .unwrap();
    }

    pub fn read(&self, relative_path: &str) -> Vec<u8> {
        fs::read(self.root.join(relative_path)).unwrap()
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}
