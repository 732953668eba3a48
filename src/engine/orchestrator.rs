//! Drives one provisioning run from preflight to cleanup.
//!
//! `Idle → Validating → Scoping → Executing → (RollingBack) → CleaningUp →
//! Done`, with one structured event per transition. A failed critical
//! preflight check goes straight to `Done`. Actions run scope by scope in
//! plan order; consecutive package actions of one scope share the worker
//! pool, everything else runs on the calling thread. Hives stay mounted
//! until after the rollback phase so registry compensations can reach them.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use super::cleanup::CleanupRegistry;
use super::context::Services;
use super::hive::{RegistryHandle, ReleaseOutcome, ResourceLifecycleManager};
use super::preflight::PreflightValidator;
use super::rollback::RollbackStack;
use super::runner::{ActionOutcome, ActionRunner};
use super::scratch::ScratchSpace;
use super::summary::ExecutionSummary;
use crate::actions::{ActionEnv, Provision};
use crate::config::{EngineSettings, PlanEntry, PreflightRequirements};
use crate::error::{ConfigError, ProvisionError};
use crate::logging::Event;
use crate::profiles::{ProfileEnumerator, Scope};
use crate::retry::RetryPolicy;

/// Every action reached its desired state (or failed softly).
pub const EXIT_SUCCESS: u8 = 0;
/// A mandatory action failed, or the run was interrupted.
pub const EXIT_FAILURE: u8 = 1;
/// Aborted before any mutation (critical preflight or invalid plan).
pub const EXIT_ABORTED: u8 = 2;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started.
    Idle,
    /// Preflight battery.
    Validating,
    /// Profile enumeration.
    Scoping,
    /// Actions running.
    Executing,
    /// Compensating after a mandatory failure.
    RollingBack,
    /// Releasing hives and running the cleanup registry.
    CleaningUp,
    /// Finished.
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Validating => "Validating",
            Self::Scoping => "Scoping",
            Self::Executing => "Executing",
            Self::RollingBack => "RollingBack",
            Self::CleaningUp => "CleaningUp",
            Self::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    /// What happened.
    pub summary: ExecutionSummary,
    /// Process exit code.
    pub exit_code: u8,
    /// States visited, in order.
    pub states: Vec<RunState>,
    /// The interrupt flag stopped scheduling.
    pub interrupted: bool,
}

#[derive(Debug)]
struct Progress {
    summary: ExecutionSummary,
    hard_failures: usize,
    interrupted: bool,
    states: Vec<RunState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            summary: ExecutionSummary::default(),
            hard_failures: 0,
            interrupted: false,
            states: vec![RunState::Idle],
        }
    }

    fn record(&mut self, entry: &PlanEntry, scope: &Scope, outcome: &ActionOutcome) {
        if matches!(outcome, ActionOutcome::HardFailure { .. }) {
            self.hard_failures += 1;
        }
        self.summary
            .record(entry.action.category(), item_label(entry, scope), outcome);
    }

    fn finish(self, started: Instant, exit_code: u8) -> RunReport {
        let mut summary = self.summary;
        summary.elapsed = started.elapsed();
        RunReport {
            summary,
            exit_code,
            states: self.states,
            interrupted: self.interrupted,
        }
    }
}

fn item_label(entry: &PlanEntry, scope: &Scope) -> String {
    match scope {
        Scope::Machine => entry.action.description(),
        _ => format!("{} ({scope})", entry.action.description()),
    }
}

/// Runs a plan against the host described by its [`Services`].
#[derive(Debug)]
pub struct Orchestrator {
    services: Services,
    policy: RetryPolicy,
    workers: usize,
    rollback: bool,
    dry_run: bool,
    interrupt: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Create an orchestrator with the given engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the settings are out of range.
    pub fn new(services: Services, settings: &EngineSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            services,
            policy: settings.retry_policy()?,
            workers: settings.workers,
            rollback: settings.rollback,
            dry_run: settings.dry_run,
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop scheduling new actions once `flag` is set.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Execute `actions` after checking `preflight`.
    pub fn run(&self, preflight: &PreflightRequirements, actions: &[PlanEntry]) -> RunReport {
        let started = Instant::now();
        let log = &self.services.log;
        let mut progress = Progress::new();
        if self.dry_run {
            log.dry_run("no changes will be made");
        }

        self.enter(&mut progress, RunState::Validating);
        let report = PreflightValidator::new(Arc::clone(&self.services.probe), Arc::clone(log))
            .validate(preflight);
        progress.summary.warnings.extend(report.warnings);
        if !report.passed {
            let err = ProvisionError::CriticalPreflight {
                failed: report.failed_checks,
            };
            log.event(Event::error("orchestrator", err.to_string()).classification(err.kind()));
            progress.summary.errors.push(err.to_string());
            self.enter(&mut progress, RunState::Done);
            return progress.finish(started, EXIT_ABORTED);
        }

        self.enter(&mut progress, RunState::Scoping);
        let scopes = self.scopes(actions, &mut progress);

        let cleanup = CleanupRegistry::new(Arc::clone(log));
        let rollback = RollbackStack::new(Arc::clone(log));
        let hives = ResourceLifecycleManager::new(
            Arc::clone(&self.services.executor),
            Arc::clone(&self.services.registry),
            Arc::clone(&self.services.sleeper),
            Arc::clone(log),
            self.dry_run,
        )
        .with_timeout(self.policy.timeout);
        let runner = ActionRunner::new(
            Arc::clone(&self.services.executor),
            Arc::clone(&self.services.sleeper),
            Arc::clone(log),
            self.policy.clone(),
            self.dry_run,
        );

        self.enter(&mut progress, RunState::Executing);
        let handles = {
            let scratch = ScratchSpace::new(Arc::clone(&self.services.fs), &cleanup);
            let stage = Stage {
                hives: &hives,
                runner: &runner,
                cleanup: &cleanup,
                rollback: &rollback,
                scratch: &scratch,
            };
            self.execute_all(&stage, &scopes, actions, &mut progress)
        };

        if progress.hard_failures > 0 {
            self.roll_back(&rollback, &mut progress);
        }

        self.enter(&mut progress, RunState::CleaningUp);
        for handle in &handles {
            if let ReleaseOutcome::Failed(e) = hives.release(handle) {
                progress.summary.warnings.push(e.to_string());
            }
        }
        let report = cleanup.run_all();
        progress.summary.warnings.extend(report.failed);

        let exit_code = if progress.hard_failures > 0 || progress.interrupted {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        };
        self.enter(&mut progress, RunState::Done);
        log.event(
            Event::info(
                "orchestrator",
                format!(
                    "finished: {} succeeded, {} failed, {} skipped",
                    progress.summary.succeeded(),
                    progress.summary.errors.len(),
                    progress.summary.skipped.len()
                ),
            )
            .classification(format!("exit {exit_code}")),
        );
        progress.finish(started, exit_code)
    }

    fn roll_back(&self, rollback: &RollbackStack, progress: &mut Progress) {
        if !self.rollback {
            if !rollback.is_empty() {
                self.services.log.warn(&format!(
                    "rollback disabled; {} applied action(s) left in place",
                    rollback.len()
                ));
            }
            return;
        }
        self.enter(progress, RunState::RollingBack);
        let reason = format!("{} mandatory action(s) failed", progress.hard_failures);
        let report = rollback.invoke_all(&reason);
        progress.summary.rollbacks.extend(report.compensated);
        progress
            .summary
            .warnings
            .extend(report.failed.iter().map(ToString::to_string));
    }

    fn enter(&self, progress: &mut Progress, next: RunState) {
        let from = progress.states.last().copied().unwrap_or(RunState::Idle);
        self.services.log.event(
            Event::info("orchestrator", format!("{from} -> {next}")).classification(next),
        );
        progress.states.push(next);
    }

    /// Machine first, then enumerated profiles when any entry needs them.
    fn scopes(&self, actions: &[PlanEntry], progress: &mut Progress) -> Vec<Scope> {
        let mut scopes = vec![Scope::Machine];
        if !actions.iter().any(|e| e.scope.is_per_user()) {
            return scopes;
        }
        let enumerator = ProfileEnumerator::new(
            Arc::clone(&self.services.profiles),
            Arc::clone(&self.services.fs),
        );
        match enumerator.enumerate_profiles(self.services.log.as_ref()) {
            Ok(found) => {
                let labels: Vec<String> = found.iter().map(Scope::label).collect();
                self.services
                    .log
                    .info(&format!("{} profile scope(s): {}", found.len(), labels.join(", ")));
                scopes.extend(found);
            }
            Err(e) => {
                let message = format!("profile enumeration failed: {e:#}");
                self.services
                    .log
                    .event(Event::warn("orchestrator", message.clone()));
                progress.summary.warnings.push(message.clone());
                for entry in actions.iter().filter(|e| e.scope.is_per_user()) {
                    let item = format!("{} ({})", entry.action.description(), entry.scope);
                    if entry.mandatory {
                        progress.summary.errors.push(format!("{item}: {message}"));
                        progress.hard_failures += 1;
                    } else {
                        progress.summary.skipped.push(item);
                    }
                }
            }
        }
        scopes
    }

    fn execute_all(
        &self,
        stage: &Stage<'_>,
        scopes: &[Scope],
        actions: &[PlanEntry],
        progress: &mut Progress,
    ) -> Vec<RegistryHandle> {
        let pool = self.pool();
        let mut handles = Vec::new();

        for scope in scopes {
            let entries: Vec<&PlanEntry> =
                actions.iter().filter(|e| e.scope.matches(scope)).collect();
            if entries.is_empty() {
                continue;
            }
            if let Some(reason) = self.halt_reason(progress) {
                for entry in &entries {
                    self.skip(progress, entry, scope, reason);
                }
                continue;
            }
            self.services.log.stage(&format!("Provisioning {scope}"));

            let hive = if entries.iter().any(|e| e.action.category().needs_hive()) {
                stage.hives.acquire(scope, stage.cleanup).map(|handle| {
                    handles.push(handle.clone());
                    Some(handle)
                })
            } else {
                Ok(None)
            };
            let user_root = hive
                .as_ref()
                .ok()
                .and_then(Option::as_ref)
                .and_then(RegistryHandle::root);
            let env = ActionEnv {
                executor: self.services.executor.as_ref(),
                registry: self.services.registry.as_ref(),
                scratch: stage.scratch,
                user_root,
                timeout: self.policy.timeout,
            };

            let batches = entries.chunk_by(|a, b| {
                a.action.category().is_package() && b.action.category().is_package()
            });
            for batch in batches {
                if let (Some(pool), [_, _, ..]) = (&pool, batch) {
                    if let Some(reason) = self.halt_reason(progress) {
                        for entry in batch {
                            self.skip(progress, entry, scope, reason);
                        }
                    } else {
                        self.run_batch(pool, stage, batch, scope, &env, progress);
                    }
                    continue;
                }
                for entry in batch {
                    if let Some(reason) = self.halt_reason(progress) {
                        self.skip(progress, entry, scope, reason);
                        continue;
                    }
                    if let (true, Err(e)) = (entry.action.category().needs_hive(), &hive) {
                        self.hive_unavailable(progress, entry, scope, e);
                        continue;
                    }
                    let outcome = stage.runner.execute(
                        &entry.action,
                        entry.mandatory,
                        scope,
                        &env,
                        stage.rollback,
                    );
                    progress.record(entry, scope, &outcome);
                }
            }
        }
        handles
    }

    /// Run consecutive package actions concurrently. Actions not yet started
    /// when a mandatory one fails (or the interrupt fires) are skipped.
    fn run_batch(
        &self,
        pool: &rayon::ThreadPool,
        stage: &Stage<'_>,
        batch: &[&PlanEntry],
        scope: &Scope,
        env: &ActionEnv<'_>,
        progress: &mut Progress,
    ) {
        self.services.log.debug(&format!(
            "running {} package action(s) on {} worker(s)",
            batch.len(),
            pool.current_num_threads()
        ));
        let stop = AtomicBool::new(false);
        let interrupt = &self.interrupt;
        let outcomes: Vec<Option<ActionOutcome>> = pool.install(|| {
            batch
                .par_iter()
                .map(|entry| {
                    if stop.load(Ordering::SeqCst) || interrupt.load(Ordering::SeqCst) {
                        return None;
                    }
                    let outcome = stage.runner.execute(
                        &entry.action,
                        entry.mandatory,
                        scope,
                        env,
                        stage.rollback,
                    );
                    if matches!(outcome, ActionOutcome::HardFailure { .. }) {
                        stop.store(true, Ordering::SeqCst);
                    }
                    Some(outcome)
                })
                .collect()
        });

        let mut not_started = Vec::new();
        for (entry, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                Some(outcome) => progress.record(entry, scope, &outcome),
                None => not_started.push(*entry),
            }
        }
        if !not_started.is_empty() {
            let reason = self.halt_reason(progress).unwrap_or("halted");
            for entry in not_started {
                self.skip(progress, entry, scope, reason);
            }
        }
    }

    fn pool(&self) -> Option<rayon::ThreadPool> {
        if self.workers <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("winprov-worker-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                self.services
                    .log
                    .warn(&format!("worker pool unavailable ({e}); running serially"));
                None
            }
        }
    }

    /// Why no further action may start, if any.
    fn halt_reason(&self, progress: &mut Progress) -> Option<&'static str> {
        if !progress.interrupted && self.interrupt.load(Ordering::SeqCst) {
            progress.interrupted = true;
            self.services.log.event(
                Event::warn("orchestrator", "interrupted; no further actions will start")
                    .classification("Interrupted"),
            );
        }
        if progress.interrupted {
            Some("interrupted")
        } else if progress.hard_failures > 0 {
            Some("halted after a mandatory failure")
        } else {
            None
        }
    }

    fn skip(&self, progress: &mut Progress, entry: &PlanEntry, scope: &Scope, reason: &str) {
        let item = item_label(entry, scope);
        self.services.log.event(
            Event::info("orchestrator", format!("{item}: not attempted ({reason})"))
                .scope(scope.label())
                .classification("Skipped"),
        );
        progress.summary.skipped.push(item);
    }

    fn hive_unavailable(
        &self,
        progress: &mut Progress,
        entry: &PlanEntry,
        scope: &Scope,
        error: &ProvisionError,
    ) {
        let item = item_label(entry, scope);
        let message = format!("{item}: skipped, {error}");
        if entry.mandatory {
            self.services.log.event(
                Event::error("orchestrator", message.clone())
                    .scope(scope.label())
                    .classification(format!("HardFailure/{}", error.kind())),
            );
            progress.summary.errors.push(message);
            progress.hard_failures += 1;
        } else {
            self.services.log.event(
                Event::warn("orchestrator", message.clone())
                    .scope(scope.label())
                    .classification(error.kind()),
            );
            progress.summary.warnings.push(message);
            progress.summary.skipped.push(item);
        }
    }
}

/// Per-run collaborators borrowed by the execution phase.
#[derive(Debug)]
struct Stage<'a> {
    hives: &'a ResourceLifecycleManager,
    runner: &'a ActionRunner,
    cleanup: &'a CleanupRegistry,
    rollback: &'a RollbackStack,
    scratch: &'a ScratchSpace<'a>,
}
