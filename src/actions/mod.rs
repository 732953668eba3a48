//! Provisioning actions: idempotency check, one tool invocation to apply,
//! and an optional compensating invocation.
pub mod capability;
pub mod classify;
pub mod package;
pub mod registry;
pub mod service;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

pub use classify::{ExitClassification, Intent, Tool};

use crate::exec::{ExecResult, Executor};
use crate::registry::RegistryReader;

/// One external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Tool used, which selects the exit classification.
    pub tool: Tool,
    /// What the call is trying to achieve.
    pub intent: Intent,
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
}

impl Invocation {
    /// Build an invocation from string-like arguments.
    #[must_use]
    pub fn new<I, S>(tool: Tool, intent: Intent, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool,
            intent,
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments as borrowed strings, the shape [`Executor`] takes.
    #[must_use]
    pub fn arg_refs(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Undo step recorded after a successful action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compensation {
    /// What is being undone.
    pub description: String,
    /// The call that undoes it.
    pub invocation: Invocation,
}

/// Everything needed to apply an action once the idempotency check says
/// it is not yet satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// The single call that applies the action.
    pub apply: Invocation,
    /// How to undo it, when undo is possible.
    pub compensation: Option<Compensation>,
}

/// Writable scratch area for files a tool reads (e.g. `.reg` imports).
pub trait Scratch: Send + Sync + fmt::Debug {
    /// Write `contents` to a new scratch file named after `stem` and return
    /// its path. The file is removed during cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch area or the file cannot be created.
    fn write(&self, stem: &str, contents: &[u8]) -> Result<PathBuf>;
}

/// What an action can see while checking or preparing itself.
#[derive(Debug, Clone, Copy)]
pub struct ActionEnv<'a> {
    /// Process boundary for read-only queries.
    pub executor: &'a dyn Executor,
    /// Registry read access.
    pub registry: &'a dyn RegistryReader,
    /// Scratch file area.
    pub scratch: &'a dyn Scratch,
    /// Root of the scope's user hive (`HKEY_USERS\<mount>`), if any.
    pub user_root: Option<&'a str>,
    /// Budget for each read-only query; a query that exceeds it is killed.
    pub timeout: Duration,
}

impl ActionEnv<'_> {
    /// Run a read-only query under the time budget.
    ///
    /// A timed-out query comes back unsuccessful, so checks built on it read
    /// as "not satisfied".
    ///
    /// # Errors
    ///
    /// Returns an error only if the process cannot be spawned.
    pub fn query(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        self.executor.run_with_timeout(program, args, self.timeout)
    }
}

/// Coarse grouping used for batching, scope checks and the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    /// Package manager installs.
    PackageInstall,
    /// Package removals.
    PackageRemoval,
    /// Optional capability removals.
    Capability,
    /// Registry mutations.
    Registry,
    /// Service configuration.
    Service,
}

impl ActionCategory {
    /// Package-manager actions may run concurrently within a batch.
    #[must_use]
    pub const fn is_package(self) -> bool {
        matches!(self, Self::PackageInstall | Self::PackageRemoval)
    }

    /// Registry-class actions need the scope's hive.
    #[must_use]
    pub const fn needs_hive(self) -> bool {
        matches!(self, Self::Registry)
    }
}

/// Behaviour every action kind implements.
pub trait Provision {
    /// Human-readable description.
    fn description(&self) -> String;

    /// Grouping for scheduling and reporting.
    fn category(&self) -> ActionCategory;

    /// Read-only check whether the desired state already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the current state cannot be determined.
    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool>;

    /// Build the invocation that applies the action, snapshotting whatever
    /// the compensation needs first.
    ///
    /// # Errors
    ///
    /// Returns an error if the invocation cannot be built.
    fn prepare(&self, env: &ActionEnv<'_>) -> Result<Prepared>;

    /// Check plan-level constraints that do not need the machine.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first violated constraint.
    fn validate(&self) -> Result<(), String>;
}

/// A provisioning action as written in a plan file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Install a package by exact id.
    PackageInstall(package::PackageInstall),
    /// Remove app packages matching a name pattern.
    PackageUninstall(package::PackageUninstall),
    /// Remove an optional Windows capability.
    CapabilityRemoval(capability::CapabilityRemoval),
    /// Set or delete values under one registry key.
    RegistryMutation(registry::RegistryMutation),
    /// Disable a service.
    ServiceDisable(service::ServiceDisable),
}

impl Action {
    fn inner(&self) -> &dyn Provision {
        match self {
            Self::PackageInstall(a) => a,
            Self::PackageUninstall(a) => a,
            Self::CapabilityRemoval(a) => a,
            Self::RegistryMutation(a) => a,
            Self::ServiceDisable(a) => a,
        }
    }
}

impl Provision for Action {
    fn description(&self) -> String {
        self.inner().description()
    }

    fn category(&self) -> ActionCategory {
        self.inner().category()
    }

    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool> {
        self.inner().is_already_satisfied(env)
    }

    fn prepare(&self, env: &ActionEnv<'_>) -> Result<Prepared> {
        self.inner().prepare(env)
    }

    fn validate(&self) -> Result<(), String> {
        self.inner().validate()
    }
}

/// Reject empty identifiers and characters that would break quoting.
pub(crate) fn validate_identifier(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value.contains(['\'', '"', '\n', '\r']) {
        return Err(format!("{field} '{value}' contains quotes or line breaks"));
    }
    Ok(())
}
