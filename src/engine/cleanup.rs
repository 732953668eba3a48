//! Priority-ordered cleanup that runs on every exit path.
//!
//! Entries are consumed exactly once, highest priority first and in
//! registration order for equal priorities. Failures and panics inside an
//! entry are logged and never propagate. Dropping the registry runs whatever
//! is still pending.
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::logging::{Event, Log};

/// Registry handles into a hive; must close before the hive is unloaded.
pub const PRIORITY_HANDLES: u8 = 100;
/// Mounted hives.
pub const PRIORITY_HIVES: u8 = 75;
/// Scratch files.
pub const PRIORITY_SCRATCH_FILES: u8 = 50;
/// Scratch directory and caches.
pub const PRIORITY_SCRATCH_DIR: u8 = 25;

type CleanupFn = Box<dyn FnOnce() -> Result<()> + Send>;

struct CleanupEntry {
    name: String,
    priority: u8,
    action: CleanupFn,
}

/// Result of one [`CleanupRegistry::run_all`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names of entries that completed.
    pub completed: Vec<String>,
    /// `name: reason` for entries that failed or panicked.
    pub failed: Vec<String>,
}

/// Guaranteed-cleanup registry.
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
    log: Arc<dyn Log>,
}

impl fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl CleanupRegistry {
    /// Create an empty registry that reports through `log`.
    #[must_use]
    pub fn new(log: Arc<dyn Log>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Register `action` under `name` at `priority`.
    pub fn register<F>(&self, name: impl Into<String>, priority: u8, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let name = name.into();
        self.log
            .debug(&format!("cleanup registered: {name} (priority {priority})"));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CleanupEntry {
                name,
                priority,
                action: Box::new(action),
            });
    }

    /// Number of entries not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every pending entry. Calling it again runs only entries
    /// registered since the previous call.
    pub fn run_all(&self) -> CleanupReport {
        let mut entries =
            std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner));
        let mut report = CleanupReport::default();
        if entries.is_empty() {
            return report;
        }
        // sort_by is stable: equal priorities keep registration order
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));

        for entry in entries {
            let CleanupEntry {
                name,
                priority,
                action,
            } = entry;
            match catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => {
                    self.log.debug(&format!("cleanup done: {name} (priority {priority})"));
                    report.completed.push(name);
                }
                Ok(Err(e)) => {
                    self.log.event(
                        Event::warn("cleanup", format!("cleanup '{name}' failed: {e:#}"))
                            .classification("CleanupFailure"),
                    );
                    report.failed.push(format!("{name}: {e:#}"));
                }
                Err(_) => {
                    self.log.event(
                        Event::error("cleanup", format!("cleanup '{name}' panicked"))
                            .classification("CleanupPanic"),
                    );
                    report.failed.push(format!("{name}: panicked"));
                }
            }
        }
        report
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        if self.pending() > 0 {
            self.run_all();
        }
    }
}
