//! The collaborators a run is wired from.
use std::sync::Arc;

use crate::engine::preflight::{HostProbe, SystemProbe};
use crate::exec::{Executor, SystemExecutor};
use crate::logging::Log;
use crate::operations::{FileSystemOps, SystemFileSystemOps};
use crate::platform::Platform;
use crate::profiles::{ProfileSource, RegProfileSource};
use crate::registry::RegistryReader;
use crate::retry::{Sleeper, ThreadSleeper};

/// Shared, injectable services for the engine.
///
/// Production code builds these with [`Services::system`]; tests assemble
/// scripted implementations field by field.
#[derive(Debug, Clone)]
pub struct Services {
    /// Process boundary.
    pub executor: Arc<dyn Executor>,
    /// Registry read access.
    pub registry: Arc<dyn RegistryReader>,
    /// Filesystem access (profile directories, scratch files).
    pub fs: Arc<dyn FileSystemOps>,
    /// Suspension for backoff and release delays.
    pub sleeper: Arc<dyn Sleeper>,
    /// Log sink.
    pub log: Arc<dyn Log>,
    /// Host queries for the preflight battery.
    pub probe: Arc<dyn SystemProbe>,
    /// OS profile index.
    pub profiles: Arc<dyn ProfileSource>,
}

impl Services {
    /// Services that act on the local host.
    #[must_use]
    pub fn system(log: Arc<dyn Log>) -> Self {
        let executor: Arc<dyn Executor> = Arc::new(SystemExecutor);
        Self {
            registry: system_registry(&executor),
            fs: Arc::new(SystemFileSystemOps),
            sleeper: Arc::new(ThreadSleeper),
            log,
            probe: Arc::new(HostProbe::new(Arc::clone(&executor), Platform::detect())),
            profiles: Arc::new(RegProfileSource::new(Arc::clone(&executor))),
            executor,
        }
    }
}

#[cfg(windows)]
fn system_registry(_executor: &Arc<dyn Executor>) -> Arc<dyn RegistryReader> {
    Arc::new(crate::registry::native::WinregReader::new())
}

#[cfg(not(windows))]
fn system_registry(executor: &Arc<dyn Executor>) -> Arc<dyn RegistryReader> {
    Arc::new(crate::registry::RegQueryReader::new(Arc::clone(executor)))
}
