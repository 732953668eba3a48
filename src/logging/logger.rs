//! Tracing-backed logger and end-of-run summary rendering.
use std::path::PathBuf;

use super::subscriber::{DRY_RUN_TARGET, EVENT_TARGET, STAGE_TARGET};
use super::types::{Event, Log};
use super::utils::log_file_path;
use crate::engine::summary::ExecutionSummary;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Emit a structured [`Event`] at a fixed tracing level.
macro_rules! emit_event {
    ($level:ident, $event:expr) => {
        tracing::$level!(
            target: EVENT_TARGET,
            component = $event.component,
            scope = $event.scope.as_deref(),
            attempt = $event.attempt,
            classification = $event.classification.as_deref(),
            "{}",
            $event.message
        )
    };
}

/// Logger that routes every message through the global `tracing` subscriber.
///
/// All messages are also written to a persistent log file at
/// `<cache>/winprov/<command>.log` by the subscriber's file layer,
/// regardless of the verbose flag.
#[derive(Debug)]
pub struct Logger {
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// Stores the log file path for display in the run summary.  The file
    /// itself is created by [`init_subscriber`](super::subscriber::init_subscriber).
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    /// Emit a structured event with its fields attached.
    pub fn event(&self, event: &Event) {
        match event.level {
            tracing::Level::ERROR => emit_event!(error, event),
            tracing::Level::WARN => emit_event!(warn, event),
            tracing::Level::INFO => emit_event!(info, event),
            tracing::Level::DEBUG => emit_event!(debug, event),
            tracing::Level::TRACE => emit_event!(trace, event),
        }
    }

    /// Print the end-of-run summary.
    pub fn print_summary(&self, summary: &ExecutionSummary) {
        self.stage("Summary");

        let groups = [
            ("\x1b[32m", "✓", "installed", &summary.installed),
            ("\x1b[32m", "✓", "removed", &summary.removed),
            ("\x1b[32m", "✓", "configured", &summary.configured),
            ("\x1b[2m", "·", "already satisfied", &summary.already_satisfied),
            ("\x1b[37m", "~", "simulated", &summary.simulated),
            ("\x1b[33m", "○", "skipped", &summary.skipped),
            ("\x1b[35m", "↺", "rolled back", &summary.rollbacks),
        ];
        for (color, icon, label, items) in groups {
            for item in items {
                self.info(&format!("{color}{icon} {label}: {item}\x1b[0m"));
            }
        }
        for warning in &summary.warnings {
            self.info(&format!("\x1b[33m! {warning}\x1b[0m"));
        }
        for error in &summary.errors {
            self.info(&format!("\x1b[31m✗ {error}\x1b[0m"));
        }

        self.info(&format!(
            "{} installed, {} removed, {} configured, \x1b[2m{} already satisfied\x1b[0m, \
             \x1b[33m{} skipped\x1b[0m, \x1b[33m{} warnings\x1b[0m, \x1b[31m{} errors\x1b[0m, \
             {} rollbacks in {:.1}s",
            summary.installed.len(),
            summary.removed.len(),
            summary.configured.len(),
            summary.already_satisfied.len(),
            summary.skipped.len(),
            summary.warnings.len(),
            summary.errors.len(),
            summary.rollbacks.len(),
            summary.elapsed.as_secs_f64(),
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn event(&self, event: Event) {
        Self::event(self, &event);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::isolated_logger;
    use std::fs;

    fn read_log(log: &Logger) -> String {
        let path = log.log_path().expect("log path should exist");
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn log_file_is_created() {
        let (log, _tmp, _guard) = isolated_logger();
        let path = log.log_path().expect("log path should exist");
        assert!(path.exists(), "log file should be created by the file layer");
    }

    #[test]
    fn debug_always_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("debug-marker-{}", std::process::id());
        log.debug(&marker);
        assert!(read_log(&log).contains(&marker));
    }

    #[test]
    fn warn_written_to_file_with_tag() {
        let (log, _tmp, _guard) = isolated_logger();
        log.warn("warn-marker");
        let contents = read_log(&log);
        assert!(contents.contains("[warn] warn-marker"));
    }

    #[test]
    fn stage_written_to_file_with_arrow() {
        let (log, _tmp, _guard) = isolated_logger();
        log.stage("stage-marker");
        assert!(read_log(&log).contains("==> stage-marker"));
    }

    #[test]
    fn dry_run_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        log.dry_run("would install Git.Git");
        assert!(read_log(&log).contains("[dry run] would install Git.Git"));
    }

    #[test]
    fn event_fields_reach_the_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let log_ref: &dyn Log = &log;
        log_ref.event(
            Event::warn("runner", "retrying install")
                .scope("Machine")
                .attempt(2)
                .classification("TransientFailure"),
        );
        let contents = read_log(&log);
        assert!(
            contents.contains(
                "[warn] [runner] retrying install (scope=Machine, attempt=2, class=TransientFailure)"
            ),
            "structured fields should be rendered: {contents}"
        );
    }

    #[test]
    fn summary_lists_errors() {
        let (log, _tmp, _guard) = isolated_logger();
        let summary = ExecutionSummary {
            installed: vec!["Git.Git".to_string()],
            errors: vec!["remove capability X failed".to_string()],
            ..ExecutionSummary::default()
        };
        log.print_summary(&summary);
        let contents = read_log(&log);
        assert!(contents.contains("==> Summary"));
        assert!(contents.contains("installed: Git.Git"));
        assert!(contents.contains("remove capability X failed"));
        assert!(contents.contains("1 installed"));
    }
}
