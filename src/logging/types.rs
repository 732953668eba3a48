//! Core logging types: structured events and the [`Log`] trait.
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::Level;

/// One structured record per state transition or action outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: Level,
    /// Emitting component, e.g. `orchestrator` or `hive`.
    pub component: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Scope label the event concerns, if any.
    pub scope: Option<String>,
    /// Attempt number for action events.
    pub attempt: Option<u32>,
    /// Exit classification or outcome name.
    pub classification: Option<String>,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(level: Level, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component,
            message: message.into(),
            scope: None,
            attempt: None,
            classification: None,
        }
    }

    /// Shorthand for an `INFO` event.
    #[must_use]
    pub fn info(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::INFO, component, message)
    }

    /// Shorthand for a `WARN` event.
    #[must_use]
    pub fn warn(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::WARN, component, message)
    }

    /// Shorthand for an `ERROR` event.
    #[must_use]
    pub fn error(component: &'static str, message: impl Into<String>) -> Self {
        Self::new(Level::ERROR, component, message)
    }

    /// Attach the scope label.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Attach the attempt number.
    #[must_use]
    pub const fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach a classification or outcome name.
    #[must_use]
    pub fn classification(mut self, classification: impl fmt::Display) -> Self {
        self.classification = Some(classification.to_string());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.component, self.message)?;
        let mut extras = Vec::new();
        if let Some(scope) = &self.scope {
            extras.push(format!("scope={scope}"));
        }
        if let Some(attempt) = self.attempt {
            extras.push(format!("attempt={attempt}"));
        }
        if let Some(class) = &self.classification {
            extras.push(format!("class={class}"));
        }
        if !extras.is_empty() {
            write!(f, " ({})", extras.join(", "))?;
        }
        Ok(())
    }
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) routes everything through `tracing`;
/// [`MemoryLog`](super::memory::MemoryLog) keeps it in memory for tests and
/// embedding callers.
pub trait Log: Send + Sync + fmt::Debug {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a structured event.
    fn event(&self, event: Event);
}
