//! Scratch files for tools that read their input from disk.
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context as _, Result};

use super::cleanup::{CleanupRegistry, PRIORITY_SCRATCH_DIR, PRIORITY_SCRATCH_FILES};
use crate::actions::Scratch;
use crate::operations::FileSystemOps;

/// Lazily created scratch directory whose files and directory are removed
/// by the cleanup registry.
#[derive(Debug)]
pub struct ScratchSpace<'a> {
    fs: Arc<dyn FileSystemOps>,
    cleanup: &'a CleanupRegistry,
    dir: Mutex<Option<PathBuf>>,
    counter: AtomicUsize,
}

impl<'a> ScratchSpace<'a> {
    /// Create a scratch space; nothing touches the disk until the first write.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystemOps>, cleanup: &'a CleanupRegistry) -> Self {
        Self {
            fs,
            cleanup,
            dir: Mutex::new(None),
            counter: AtomicUsize::new(0),
        }
    }

    fn dir(&self) -> Result<PathBuf> {
        let mut guard = self.dir.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dir) = guard.as_ref() {
            return Ok(dir.clone());
        }
        let dir = self
            .fs
            .create_scratch_dir()
            .context("creating scratch directory")?;
        let fs = Arc::clone(&self.fs);
        let target = dir.clone();
        self.cleanup.register(
            format!("remove scratch directory {}", dir.display()),
            PRIORITY_SCRATCH_DIR,
            move || {
                fs.remove_dir_all(&target)
                    .with_context(|| format!("removing {}", target.display()))
            },
        );
        *guard = Some(dir.clone());
        Ok(dir)
    }
}

impl Scratch for ScratchSpace<'_> {
    fn write(&self, stem: &str, contents: &[u8]) -> Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir()?.join(format!("{n:03}-{stem}.reg"));
        self.fs
            .write(&path, contents)
            .with_context(|| format!("writing {}", path.display()))?;

        let fs = Arc::clone(&self.fs);
        let target = path.clone();
        self.cleanup.register(
            format!("remove scratch file {}", path.display()),
            PRIORITY_SCRATCH_FILES,
            move || {
                if fs.exists(&target) {
                    fs.remove_file(&target)
                        .with_context(|| format!("removing {}", target.display()))?;
                }
                Ok(())
            },
        );
        Ok(path)
    }
}
