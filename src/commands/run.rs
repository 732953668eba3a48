//! Command: apply a provisioning plan.
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;

use crate::cli::RunOpts;
use crate::config::PlanFile;
use crate::engine::{Orchestrator, Services};
use crate::error::ConfigError;
use crate::logging::{Log, Logger};

/// Load the plan at `path` and layer the command-line overrides on top.
///
/// # Errors
///
/// Returns [`ConfigError`] if the plan cannot be read or parsed, or if the
/// overridden settings are out of range.
pub fn load_plan(path: &Path, opts: &RunOpts) -> Result<PlanFile, ConfigError> {
    let mut plan = PlanFile::load(path)?;
    opts.apply(&mut plan.settings);
    plan.settings.validate()?;
    Ok(plan)
}

/// Run the plan named by `opts` against this machine.
///
/// Returns the exit code of the run; `interrupt` stops scheduling of further
/// actions once set.
///
/// # Errors
///
/// Returns an error if the plan is invalid.
pub fn run(opts: &RunOpts, log: &Arc<Logger>, interrupt: Arc<AtomicBool>) -> Result<u8> {
    log.info(&format!("winprov {}", super::version_string()));

    log.stage("Loading plan");
    let plan = load_plan(&opts.plan, opts)?;
    log.info(&format!(
        "{} action(s) from {}",
        plan.actions.len(),
        opts.plan.display()
    ));
    log.debug(&format!("settings: {:?}", plan.settings));

    let services = Services::system(Arc::clone(log) as Arc<dyn Log>);
    let report = Orchestrator::new(services, &plan.settings)?
        .with_interrupt(interrupt)
        .run(&plan.preflight, &plan.actions);

    log.print_summary(&report.summary);
    Ok(report.exit_code)
}
