//! LIFO stack of compensating actions.
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::error::ProvisionError;
use crate::logging::{Event, Log};

type CompensateFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// One compensation, recorded after its action succeeded.
pub struct RollbackEntry {
    /// What the compensation undoes.
    pub description: String,
    compensate: CompensateFn,
}

impl RollbackEntry {
    /// Wrap `compensate` under `description`.
    pub fn new<F>(description: impl Into<String>, compensate: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            description: description.into(),
            compensate: Box::new(compensate),
        }
    }
}

impl fmt::Debug for RollbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackEntry")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`RollbackStack::invoke_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Descriptions of compensations that succeeded, in execution order.
    pub compensated: Vec<String>,
    /// Compensations that failed.
    pub failed: Vec<ProvisionError>,
}

/// Compensations of every successful action in the run.
pub struct RollbackStack {
    entries: Mutex<Vec<RollbackEntry>>,
    log: Arc<dyn Log>,
}

impl fmt::Debug for RollbackStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackStack")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl RollbackStack {
    /// Create an empty stack reporting through `log`.
    #[must_use]
    pub fn new(log: Arc<dyn Log>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Record a compensation.
    pub fn push(&self, entry: RollbackEntry) {
        self.log
            .debug(&format!("rollback entry recorded: {}", entry.description));
        self.lock().push(entry);
    }

    /// Number of recorded compensations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RollbackEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every compensation, most recent first. A failing compensation is
    /// logged and the unwind continues; the stack is empty afterwards.
    pub fn invoke_all(&self, reason: &str) -> RollbackReport {
        let mut report = RollbackReport::default();
        let total = self.len();
        if total == 0 {
            return report;
        }
        self.log
            .stage(&format!("Rolling back {total} action(s): {reason}"));

        loop {
            // Pop under the lock, run without it.
            let Some(entry) = self.lock().pop() else {
                break;
            };
            let RollbackEntry {
                description,
                compensate,
            } = entry;
            let outcome = match catch_unwind(AssertUnwindSafe(compensate)) {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("compensation panicked")),
            };
            match outcome {
                Ok(()) => {
                    self.log.event(
                        Event::info("rollback", format!("compensated: {description}"))
                            .classification("Compensated"),
                    );
                    report.compensated.push(description);
                }
                Err(e) => {
                    let err = ProvisionError::RollbackCompensation {
                        description,
                        reason: format!("{e:#}"),
                    };
                    self.log.event(
                        Event::error("rollback", err.to_string()).classification(err.kind()),
                    );
                    report.failed.push(err);
                }
            }
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::MemoryLog;

    #[test]
    fn unwinds_in_reverse_order() {
        let stack = RollbackStack::new(Arc::new(MemoryLog::new()));
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let o = Arc::clone(&order);
            stack.push(RollbackEntry::new(tag, move || {
                o.lock().unwrap().push(tag);
                Ok(())
            }));
        }
        let report = stack.invoke_all("test");
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        assert_eq!(report.compensated, vec!["third", "second", "first"]);
    }

    #[test]
    fn failures_do_not_stop_the_unwind_and_empty_the_stack() {
        let log = Arc::new(MemoryLog::new());
        let stack = RollbackStack::new(Arc::clone(&log) as Arc<dyn Log>);
        stack.push(RollbackEntry::new("a", || Ok(())));
        stack.push(RollbackEntry::new("b", || anyhow::bail!("winget exploded")));
        stack.push(RollbackEntry::new("c", || Ok(())));

        let report = stack.invoke_all("mandatory action failed");
        assert!(stack.is_empty());
        assert_eq!(report.compensated, vec!["c", "a"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            &report.failed[..],
            [ProvisionError::RollbackCompensation { description, .. }] if description == "b"
        ));
        assert!(log.has_event("winget exploded"));
    }

    #[test]
    fn empty_stack_is_a_no_op() {
        let log = Arc::new(MemoryLog::new());
        let stack = RollbackStack::new(Arc::clone(&log) as Arc<dyn Log>);
        assert_eq!(stack.invoke_all("nothing"), RollbackReport::default());
        assert!(log.messages().is_empty());
    }
}
