//! Executes one action against one scope: idempotency check, a single tool
//! invocation, classification, bounded retries, and a rollback entry on
//! success.
use std::fmt;
use std::sync::Arc;

use super::rollback::{RollbackEntry, RollbackStack};
use crate::actions::{
    Action, ActionEnv, Compensation, ExitClassification, Invocation, Prepared, Provision,
};
use crate::error::ProvisionError;
use crate::exec::{ExecResult, Executor};
use crate::logging::{Event, Log};
use crate::profiles::Scope;
use crate::retry::{RetryPolicy, Sleeper};

/// How a successful action reached its desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The tool ran and changed the machine.
    Applied,
    /// Nothing to do: the check or the tool reported the state already holds.
    AlreadySatisfied,
    /// Dry run; only logged.
    Simulated,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("Applied"),
            Self::AlreadySatisfied => f.write_str("AlreadySatisfied"),
            Self::Simulated => f.write_str("Simulated"),
        }
    }
}

/// Result of [`ActionRunner::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Desired state holds.
    Success {
        /// How it got there.
        disposition: Disposition,
        /// Tool invocations made (zero when the check short-circuited).
        attempts: u32,
    },
    /// An optional action failed; the run continues.
    SoftFailure {
        /// Why.
        error: ProvisionError,
    },
    /// A mandatory action failed; the run halts.
    HardFailure {
        /// Why.
        error: ProvisionError,
    },
}

impl ActionOutcome {
    /// Name used in events and the summary.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Success { .. } => "Success",
            Self::SoftFailure { .. } => "SoftFailure",
            Self::HardFailure { .. } => "HardFailure",
        }
    }
}

/// Runs actions with a shared retry policy.
#[derive(Debug, Clone)]
pub struct ActionRunner {
    executor: Arc<dyn Executor>,
    sleeper: Arc<dyn Sleeper>,
    log: Arc<dyn Log>,
    policy: RetryPolicy,
    dry_run: bool,
}

impl ActionRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        executor: Arc<dyn Executor>,
        sleeper: Arc<dyn Sleeper>,
        log: Arc<dyn Log>,
        policy: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            executor,
            sleeper,
            log,
            policy,
            dry_run,
        }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Bring `action` to its desired state in `scope`.
    ///
    /// Successful compensable actions push their undo onto `rollback`.
    pub fn execute(
        &self,
        action: &Action,
        mandatory: bool,
        scope: &Scope,
        env: &ActionEnv<'_>,
        rollback: &RollbackStack,
    ) -> ActionOutcome {
        let description = action.description();
        let label = scope.label();

        match action.is_already_satisfied(env) {
            Ok(true) => {
                self.log.event(
                    Event::info("runner", format!("{description}: already satisfied"))
                        .scope(&label)
                        .classification(Disposition::AlreadySatisfied),
                );
                return ActionOutcome::Success {
                    disposition: Disposition::AlreadySatisfied,
                    attempts: 0,
                };
            }
            Ok(false) => {}
            Err(e) => self
                .log
                .warn(&format!("{description}: state check failed ({e:#}), applying anyway")),
        }

        let prepared = match action.prepare(env) {
            Ok(p) => p,
            Err(e) => {
                let error = ProvisionError::PermanentAction {
                    action: description,
                    reason: format!("{e:#}"),
                };
                return self.fail(error, mandatory, &label, 0);
            }
        };

        if self.dry_run {
            self.simulate(&description, &prepared);
            self.log.event(
                Event::info("runner", format!("{description}: simulated"))
                    .scope(&label)
                    .classification(Disposition::Simulated),
            );
            return ActionOutcome::Success {
                disposition: Disposition::Simulated,
                attempts: 0,
            };
        }

        let Prepared {
            apply,
            compensation,
        } = prepared;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.executor.run_with_timeout(
                &apply.program,
                &apply.arg_refs(),
                self.policy.timeout,
            ) {
                Ok(result) => result,
                Err(e) => {
                    let error = ProvisionError::PermanentAction {
                        action: description,
                        reason: format!("{e:#}"),
                    };
                    return self.fail(error, mandatory, &label, attempt);
                }
            };
            let class = apply.tool.classify(apply.intent, &result);
            self.log.event(
                Event::new(
                    if class.is_success() {
                        tracing::Level::INFO
                    } else {
                        tracing::Level::WARN
                    },
                    "runner",
                    format!("{description}: {}", outcome_line(&apply, &result)),
                )
                .scope(&label)
                .attempt(attempt)
                .classification(class),
            );

            match class {
                ExitClassification::Success => {
                    if let Some(undo) = compensation {
                        rollback.push(self.rollback_entry(undo));
                    }
                    return ActionOutcome::Success {
                        disposition: Disposition::Applied,
                        attempts: attempt,
                    };
                }
                ExitClassification::AlreadyInPriorState => {
                    return ActionOutcome::Success {
                        disposition: Disposition::AlreadySatisfied,
                        attempts: attempt,
                    };
                }
                ExitClassification::TransientFailure if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    self.log.debug(&format!(
                        "{description}: retrying in {:.1}s",
                        delay.as_secs_f64()
                    ));
                    self.sleeper.sleep(delay);
                }
                ExitClassification::TransientFailure => {
                    let error = ProvisionError::TransientAction {
                        action: description,
                        attempts: attempt,
                        reason: result.detail(),
                    };
                    return self.fail(error, mandatory, &label, attempt);
                }
                ExitClassification::PermanentFailure => {
                    let error = ProvisionError::PermanentAction {
                        action: description,
                        reason: failure_reason(&result),
                    };
                    return self.fail(error, mandatory, &label, attempt);
                }
            }
        }
    }

    fn simulate(&self, description: &str, prepared: &Prepared) {
        self.log
            .dry_run(&format!("{description}: would run {}", prepared.apply));
        if let Some(undo) = &prepared.compensation {
            self.log.dry_run(&format!(
                "{description}: would record compensation '{}'",
                undo.description
            ));
        }
    }

    fn rollback_entry(&self, undo: Compensation) -> RollbackEntry {
        let executor = Arc::clone(&self.executor);
        let timeout = self.policy.timeout;
        let Compensation {
            description,
            invocation,
        } = undo;
        RollbackEntry::new(description, move || {
            let result =
                executor.run_with_timeout(&invocation.program, &invocation.arg_refs(), timeout)?;
            let class = invocation.tool.classify(invocation.intent, &result);
            if class.is_success() {
                Ok(())
            } else {
                anyhow::bail!("{invocation} -> {class}: {}", result.detail())
            }
        })
    }

    fn fail(
        &self,
        error: ProvisionError,
        mandatory: bool,
        label: &str,
        attempts: u32,
    ) -> ActionOutcome {
        let outcome = if mandatory {
            ActionOutcome::HardFailure {
                error: error.clone(),
            }
        } else {
            ActionOutcome::SoftFailure {
                error: error.clone(),
            }
        };
        let event = if mandatory {
            Event::error("runner", error.to_string())
        } else {
            Event::warn("runner", error.to_string())
        };
        self.log.event(
            event
                .scope(label)
                .attempt(attempts)
                .classification(format!("{}/{}", outcome.name(), error.kind())),
        );
        outcome
    }
}

fn outcome_line(invocation: &Invocation, result: &ExecResult) -> String {
    if result.timed_out {
        return format!("{} timed out", invocation.tool);
    }
    match result.code {
        Some(code) => format!("{} exited with {code}", invocation.tool),
        None => format!("{} exited without a code", invocation.tool),
    }
}

fn failure_reason(result: &ExecResult) -> String {
    let detail = result.detail();
    match result.code {
        Some(code) if detail.is_empty() => format!("exit code {code}"),
        Some(code) => format!("exit code {code}: {detail}"),
        None => detail,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::actions::capability::CapabilityRemoval;
    use crate::actions::package::PackageInstall;
    use crate::actions::testing::{MapRegistry, MemScratch, QueueExecutor};
    use crate::logging::MemoryLog;
    use crate::retry::RecordingSleeper;

    fn hresult(code: u32) -> i32 {
        i32::from_ne_bytes(code.to_ne_bytes())
    }

    struct Fixture {
        exec: Arc<QueueExecutor>,
        sleeper: Arc<RecordingSleeper>,
        log: Arc<MemoryLog>,
        registry: MapRegistry,
        scratch: MemScratch,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                exec: Arc::new(QueueExecutor::default()),
                sleeper: Arc::new(RecordingSleeper::new()),
                log: Arc::new(MemoryLog::new()),
                registry: MapRegistry::default(),
                scratch: MemScratch::default(),
            }
        }

        fn runner(&self, dry_run: bool) -> ActionRunner {
            ActionRunner::new(
                Arc::clone(&self.exec) as Arc<dyn Executor>,
                Arc::clone(&self.sleeper) as Arc<dyn Sleeper>,
                Arc::clone(&self.log) as Arc<dyn Log>,
                RetryPolicy::default(),
                dry_run,
            )
        }

        fn run(&self, action: &Action, mandatory: bool, rollback: &RollbackStack) -> ActionOutcome {
            let env = ActionEnv {
                executor: self.exec.as_ref(),
                registry: &self.registry,
                scratch: &self.scratch,
                user_root: None,
                timeout: crate::actions::testing::QUERY_TIMEOUT,
            };
            self.runner(false)
                .execute(action, mandatory, &Scope::Machine, &env, rollback)
        }

        fn rollback(&self) -> RollbackStack {
            RollbackStack::new(Arc::clone(&self.log) as Arc<dyn Log>)
        }
    }

    fn install() -> Action {
        Action::PackageInstall(PackageInstall {
            id: "Git.Git".to_string(),
            name: None,
            source: "winget".to_string(),
        })
    }

    fn capability() -> Action {
        Action::CapabilityRemoval(CapabilityRemoval {
            name: "App.StepsRecorder~~~~0.0.1.0".to_string(),
        })
    }

    #[test]
    fn satisfied_action_makes_no_changes() {
        let fx = Fixture::new();
        fx.exec
            .push("winget", ExecResult::ok("Name Id Version\nGit Git.Git 2.45.0\n"));
        let rollback = fx.rollback();
        let outcome = fx.run(&install(), true, &rollback);
        assert_eq!(
            outcome,
            ActionOutcome::Success {
                disposition: Disposition::AlreadySatisfied,
                attempts: 0
            }
        );
        assert_eq!(fx.exec.calls().len(), 1);
        assert!(rollback.is_empty());
    }

    #[test]
    fn every_call_runs_under_a_time_budget() {
        let fx = Fixture::new();
        fx.exec.push("winget", ExecResult::ok("No installed package found"));
        fx.exec.push("winget", ExecResult::ok("Successfully installed"));
        let rollback = fx.rollback();
        fx.run(&install(), false, &rollback);
        fx.run(&capability(), false, &rollback);
        assert!(fx.exec.calls().len() >= 3);
        assert!(fx.exec.untimed_calls().is_empty(), "{:?}", fx.exec.calls());
    }

    #[test]
    fn timed_out_check_reads_as_not_satisfied() {
        let fx = Fixture::new();
        fx.exec.push("winget", ExecResult::timeout());
        fx.exec.push("winget", ExecResult::ok("Successfully installed"));
        let rollback = fx.rollback();
        let outcome = fx.run(&install(), false, &rollback);
        assert_eq!(
            outcome,
            ActionOutcome::Success {
                disposition: Disposition::Applied,
                attempts: 1
            }
        );
    }

    #[test]
    fn success_pushes_compensation() {
        let fx = Fixture::new();
        fx.exec
            .push("winget", ExecResult::failed(hresult(0x8A15_0014), "No installed package found"));
        fx.exec.push("winget", ExecResult::ok("Successfully installed"));
        let rollback = fx.rollback();
        let outcome = fx.run(&install(), false, &rollback);
        assert_eq!(
            outcome,
            ActionOutcome::Success {
                disposition: Disposition::Applied,
                attempts: 1
            }
        );
        assert_eq!(rollback.len(), 1);
    }

    #[test]
    fn transient_failures_back_off_then_succeed() {
        let fx = Fixture::new();
        fx.exec.push("winget", ExecResult::ok("No installed package found"));
        fx.exec
            .push("winget", ExecResult::failed(hresult(0x8A15_0102), "busy"));
        fx.exec
            .push("winget", ExecResult::failed(hresult(0x8A15_0102), "busy"));
        fx.exec.push("winget", ExecResult::ok("installed"));
        let rollback = fx.rollback();
        let outcome = fx.run(&install(), true, &rollback);
        assert_eq!(
            outcome,
            ActionOutcome::Success {
                disposition: Disposition::Applied,
                attempts: 3
            }
        );
        assert_eq!(
            fx.sleeper.calls(),
            vec![Duration::from_secs(5), Duration::from_millis(7500)]
        );
        let attempts: Vec<Option<u32>> = fx.log.events().iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn exhausted_retries_of_optional_action_is_soft() {
        let fx = Fixture::new();
        fx.exec.push("winget", ExecResult::ok("No installed package found"));
        for _ in 0..3 {
            fx.exec.push("winget", ExecResult::timeout());
        }
        let rollback = fx.rollback();
        let outcome = fx.run(&install(), false, &rollback);
        assert!(matches!(
            outcome,
            ActionOutcome::SoftFailure {
                error: ProvisionError::TransientAction { attempts: 3, .. }
            }
        ));
        assert_eq!(fx.sleeper.calls().len(), 2);
        assert!(rollback.is_empty());
    }

    #[test]
    fn permanent_failure_of_mandatory_action_is_hard_without_retry() {
        let fx = Fixture::new();
        fx.exec.push("dism", ExecResult::ok("State : Installed"));
        fx.exec
            .push("dism", ExecResult::failed(hresult(0x8007_0005), "Access is denied."));
        let rollback = fx.rollback();
        let outcome = fx.run(&capability(), true, &rollback);
        assert!(matches!(
            outcome,
            ActionOutcome::HardFailure {
                error: ProvisionError::PermanentAction { .. }
            }
        ));
        assert!(fx.sleeper.calls().is_empty());
        assert_eq!(fx.exec.calls().len(), 2);
    }

    #[test]
    fn dry_run_only_logs() {
        let fx = Fixture::new();
        fx.exec.push("dism", ExecResult::ok("State : Installed"));
        let env = ActionEnv {
            executor: fx.exec.as_ref(),
            registry: &fx.registry,
            scratch: &fx.scratch,
            user_root: None,
            timeout: crate::actions::testing::QUERY_TIMEOUT,
        };
        let rollback = fx.rollback();
        let outcome =
            fx.runner(true)
                .execute(&capability(), true, &Scope::Machine, &env, &rollback);
        assert_eq!(
            outcome,
            ActionOutcome::Success {
                disposition: Disposition::Simulated,
                attempts: 0
            }
        );
        assert_eq!(fx.exec.calls().len(), 1, "only the read-only check runs");
        assert!(fx.log.contains(crate::logging::MessageKind::DryRun, "/Remove-Capability"));
        assert!(rollback.is_empty());
    }

    #[test]
    fn recorded_compensation_runs_the_undo_invocation() {
        let fx = Fixture::new();
        fx.exec.push("dism", ExecResult::ok("State : Installed"));
        fx.exec.push("dism", ExecResult::ok("The operation completed successfully."));
        let rollback = fx.rollback();
        fx.run(&capability(), true, &rollback);
        let report = rollback.invoke_all("test");
        assert_eq!(report.compensated.len(), 1);
        assert!(fx.exec.calls().last().unwrap().contains("/Add-Capability"));
    }
}
