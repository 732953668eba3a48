//! In-memory [`Log`] implementation.
use std::sync::Mutex;

use super::types::{Event, Log};

/// Kind of a plain message captured by [`MemoryLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Stage header.
    Stage,
    /// Informational message.
    Info,
    /// Debug message.
    Debug,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Dry-run notice.
    DryRun,
}

/// [`Log`] that keeps every message and event in memory.
///
/// Useful for embedding the engine and for asserting on log output in tests.
#[derive(Debug, Default)]
pub struct MemoryLog {
    messages: Mutex<Vec<(MessageKind, String)>>,
    events: Mutex<Vec<Event>>,
}

impl MemoryLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All plain messages in emission order.
    #[must_use]
    pub fn messages(&self) -> Vec<(MessageKind, String)> {
        self.messages.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// All structured events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Returns `true` if any message of `kind` contains `needle`.
    #[must_use]
    pub fn contains(&self, kind: MessageKind, needle: &str) -> bool {
        self.messages()
            .iter()
            .any(|(k, m)| *k == kind && m.contains(needle))
    }

    /// Returns `true` if any event message contains `needle`.
    #[must_use]
    pub fn has_event(&self, needle: &str) -> bool {
        self.events().iter().any(|e| e.message.contains(needle))
    }

    fn push(&self, kind: MessageKind, msg: &str) {
        if let Ok(mut guard) = self.messages.lock() {
            guard.push((kind, msg.to_string()));
        }
    }
}

impl Log for MemoryLog {
    fn stage(&self, msg: &str) {
        self.push(MessageKind::Stage, msg);
    }

    fn info(&self, msg: &str) {
        self.push(MessageKind::Info, msg);
    }

    fn debug(&self, msg: &str) {
        self.push(MessageKind::Debug, msg);
    }

    fn warn(&self, msg: &str) {
        self.push(MessageKind::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.push(MessageKind::Error, msg);
    }

    fn dry_run(&self, msg: &str) {
        self.push(MessageKind::DryRun, msg);
    }

    fn event(&self, event: Event) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_messages_and_events() {
        let log = MemoryLog::new();
        log.warn("hive busy");
        log.event(Event::info("orchestrator", "Validating"));
        assert!(log.contains(MessageKind::Warn, "busy"));
        assert!(!log.contains(MessageKind::Error, "busy"));
        assert!(log.has_event("Validating"));
        assert_eq!(log.events().len(), 1);
    }
}
