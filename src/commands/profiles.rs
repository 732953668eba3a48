//! Command: list the scopes per-user actions would target.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::operations::SystemFileSystemOps;
use crate::profiles::{ProfileEnumerator, RegProfileSource, Scope};

/// Enumerate profiles and log one line per scope.
///
/// # Errors
///
/// Returns an error if the profile index cannot be read.
pub fn run(log: &Logger) -> Result<()> {
    log.stage("Enumerating profiles");
    let enumerator = ProfileEnumerator::new(
        Arc::new(RegProfileSource::new(Arc::new(SystemExecutor))),
        Arc::new(SystemFileSystemOps),
    );
    let scopes = enumerator
        .enumerate_profiles(log)
        .context("reading the profile list")?;

    for scope in &scopes {
        match scope {
            Scope::UserProfile {
                security_id,
                hive_path,
                ..
            } => log.info(&format!("{scope}: {security_id} {}", hive_path.display())),
            Scope::DefaultProfile { hive_path } => {
                log.info(&format!("{scope}: {}", hive_path.display()));
            }
            Scope::Machine => {}
        }
    }
    log.info(&format!("{} user profile(s)", scopes.len().saturating_sub(1)));
    Ok(())
}
