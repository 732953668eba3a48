//! Filesystem operation abstractions for dependency injection.
//!
//! Provides the [`FileSystemOps`] trait so that profile discovery and the
//! `.reg` scratch files can be unit-tested without touching the real
//! filesystem.  Production code uses [`SystemFileSystemOps`]; tests use
//! `MockFileSystemOps`.

use std::io;
use std::path::{Path, PathBuf};

/// Abstraction over the filesystem queries and writes the engine performs.
pub trait FileSystemOps: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `path` exists on the filesystem.
    fn exists(&self, path: &Path) -> bool;

    /// Returns `true` if `path` is a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Create a fresh, uniquely named scratch directory and return its path.
    ///
    /// The directory is not deleted automatically; the caller registers its
    /// removal with the cleanup registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn create_scratch_dir(&self) -> io::Result<PathBuf>;

    /// Write `contents` to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Remove the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove the directory at `path` and everything beneath it.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_scratch_dir(&self) -> io::Result<PathBuf> {
        Ok(tempfile::Builder::new()
            .prefix("winprov-")
            .tempdir()?
            .keep())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

/// In-memory [`FileSystemOps`] for unit tests.
///
/// Pre-configure existing paths with the builder-style methods; writes and
/// removals are recorded so tests can assert on scratch-file handling.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockFileSystemOps {
    existing: std::sync::Mutex<std::collections::BTreeSet<PathBuf>>,
    files: std::sync::Mutex<std::collections::BTreeMap<PathBuf, Vec<u8>>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockFileSystemOps {
    /// Create an empty mock with nothing configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as an existing directory.
    #[must_use]
    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.existing
            .lock()
            .expect("mock fs poisoned")
            .insert(path.into());
        self
    }

    /// Mark `path` as an existing regular file.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        let p = path.into();
        self.existing
            .lock()
            .expect("mock fs poisoned")
            .insert(p.clone());
        self.files
            .lock()
            .expect("mock fs poisoned")
            .insert(p, Vec::new());
        self
    }

    /// Contents last written to `path`, if it still exists.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().expect("mock fs poisoned").get(path).cloned()
    }

    /// Number of regular files currently present.
    pub fn file_count(&self) -> usize {
        self.files.lock().expect("mock fs poisoned").len()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl FileSystemOps for MockFileSystemOps {
    fn exists(&self, path: &Path) -> bool {
        self.existing.lock().expect("mock fs poisoned").contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.lock().expect("mock fs poisoned").contains_key(path)
    }

    fn create_scratch_dir(&self) -> io::Result<PathBuf> {
        let dir = PathBuf::from("/scratch/winprov-test");
        self.existing
            .lock()
            .expect("mock fs poisoned")
            .insert(dir.clone());
        Ok(dir)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.existing
            .lock()
            .expect("mock fs poisoned")
            .insert(path.to_path_buf());
        self.files
            .lock()
            .expect("mock fs poisoned")
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.existing.lock().expect("mock fs poisoned").remove(path);
        self.files
            .lock()
            .expect("mock fs poisoned")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.existing
            .lock()
            .expect("mock fs poisoned")
            .retain(|p| !p.starts_with(path));
        self.files
            .lock()
            .expect("mock fs poisoned")
            .retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn system_scratch_dir_roundtrip() {
        let fs = SystemFileSystemOps;
        let dir = fs.create_scratch_dir().unwrap();
        assert!(fs.exists(&dir));
        let file = dir.join("a.reg");
        fs.write(&file, b"data").unwrap();
        assert!(fs.is_file(&file));
        fs.remove_file(&file).unwrap();
        assert!(!fs.exists(&file));
        fs.remove_dir_all(&dir).unwrap();
        assert!(!fs.exists(&dir));
    }

    #[test]
    fn mock_tracks_writes_and_removals() {
        let fs = MockFileSystemOps::new().with_dir("/profiles/alice");
        assert!(fs.exists(Path::new("/profiles/alice")));
        let dir = fs.create_scratch_dir().unwrap();
        let file = dir.join("x.reg");
        fs.write(&file, b"abc").unwrap();
        assert_eq!(fs.contents(&file), Some(b"abc".to_vec()));
        fs.remove_dir_all(&dir).unwrap();
        assert_eq!(fs.file_count(), 0);
        assert!(!fs.exists(&dir));
    }

    #[test]
    fn mock_remove_missing_file_errors() {
        let fs = MockFileSystemOps::new();
        assert!(fs.remove_file(Path::new("/nope")).is_err());
    }
}
