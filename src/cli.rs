//! Command-line interface.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::EngineSettings;

/// Top-level CLI entry point for the provisioning engine.
#[derive(Parser, Debug)]
#[command(
    name = "winprov",
    about = "Transactional Windows workstation provisioning engine",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a provisioning plan
    Run(RunOpts),
    /// Check whether this machine can be provisioned
    Preflight(PreflightOpts),
    /// List the profile scopes registry actions would target
    Profiles,
    /// Print version information
    Version,
}

impl Command {
    /// Name used for the log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Preflight(_) => "preflight",
            Self::Profiles => "profiles",
            Self::Version => "version",
        }
    }
}

/// Options for the `run` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunOpts {
    /// Plan file (.toml or .json)
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Preview changes without applying
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Leave applied actions in place when a mandatory action fails
    #[arg(long = "no-rollback", action = clap::ArgAction::SetFalse)]
    pub rollback: bool,

    /// Worker threads for package batches
    #[arg(long)]
    pub workers: Option<usize>,

    /// Attempts per action, including the first
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl RunOpts {
    /// Apply command-line overrides on top of the plan's settings.
    pub fn apply(&self, settings: &mut EngineSettings) {
        settings.dry_run |= self.dry_run;
        if !self.rollback {
            settings.rollback = false;
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(attempts) = self.max_attempts {
            settings.max_attempts = attempts;
        }
    }
}

/// Options for the `preflight` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PreflightOpts {
    /// Plan file whose `[preflight]` thresholds to use
    #[arg(short, long)]
    pub plan: Option<PathBuf>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run_opts(args: &[&str]) -> RunOpts {
        let cli = Cli::parse_from(args);
        match cli.command {
            Command::Run(opts) => opts,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_run_with_plan() {
        let opts = run_opts(&["winprov", "run", "--plan", "plan.toml"]);
        assert_eq!(opts.plan, PathBuf::from("plan.toml"));
        assert!(!opts.dry_run);
        assert!(opts.rollback, "rollback should be on by default");
        assert_eq!(opts.workers, None);
    }

    #[test]
    fn parse_run_dry_run_short() {
        let opts = run_opts(&["winprov", "run", "-p", "plan.json", "-d"]);
        assert!(opts.dry_run);
    }

    #[test]
    fn run_requires_plan() {
        assert!(Cli::try_parse_from(["winprov", "run"]).is_err());
    }

    #[test]
    fn overrides_replace_plan_settings() {
        let opts = run_opts(&[
            "winprov",
            "run",
            "--plan",
            "plan.toml",
            "--no-rollback",
            "--workers",
            "1",
            "--max-attempts",
            "5",
        ]);
        let mut settings = EngineSettings::default();
        opts.apply(&mut settings);
        assert!(!settings.rollback);
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.max_attempts, 5);
        assert!(!settings.dry_run);
    }

    #[test]
    fn absent_flags_keep_plan_settings() {
        let opts = run_opts(&["winprov", "run", "--plan", "plan.toml"]);
        let mut settings = EngineSettings {
            dry_run: true,
            workers: 4,
            ..EngineSettings::default()
        };
        opts.apply(&mut settings);
        assert!(settings.dry_run);
        assert!(settings.rollback);
        assert_eq!(settings.workers, 4);
    }

    #[test]
    fn parse_preflight_without_plan() {
        let cli = Cli::parse_from(["winprov", "preflight"]);
        assert!(matches!(cli.command, Command::Preflight(PreflightOpts { plan: None })));
    }

    #[test]
    fn parse_verbose_is_global() {
        let cli = Cli::parse_from(["winprov", "profiles", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.command.name(), "profiles");
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["winprov", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }
}
