//! Command: run the preflight battery on its own.
use std::sync::Arc;

use anyhow::Result;

use crate::cli::PreflightOpts;
use crate::config::{PlanFile, PreflightRequirements};
use crate::engine::preflight::{HostProbe, PreflightValidator};
use crate::engine::{EXIT_ABORTED, EXIT_SUCCESS};
use crate::exec::SystemExecutor;
use crate::logging::{Log, Logger};
use crate::platform::Platform;

/// Check this machine against the plan's thresholds (or the defaults).
///
/// Returns [`EXIT_SUCCESS`] when every critical check passes, otherwise
/// [`EXIT_ABORTED`].
///
/// # Errors
///
/// Returns an error if the plan file is given but invalid.
pub fn run(opts: &PreflightOpts, log: &Arc<Logger>) -> Result<u8> {
    let requirements = match &opts.plan {
        Some(path) => PlanFile::load(path)?.preflight,
        None => PreflightRequirements::default(),
    };

    log.stage("Preflight");
    let probe = HostProbe::new(Arc::new(SystemExecutor), Platform::detect());
    let report = PreflightValidator::new(Arc::new(probe), Arc::clone(log) as Arc<dyn Log>)
        .validate(&requirements);

    for warning in &report.warnings {
        log.warn(warning);
    }
    if report.passed {
        log.info("all critical checks passed");
        Ok(EXIT_SUCCESS)
    } else {
        log.error(&format!(
            "critical checks failed: {}",
            report.failed_checks.join(", ")
        ));
        Ok(EXIT_ABORTED)
    }
}
