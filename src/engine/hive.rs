//! Per-scope registry hive lifecycle: load, reuse, release.
//!
//! A user or default-profile scope needs its `NTUSER.DAT` mounted under
//! `HKEY_USERS` before registry actions can touch it. Mounts this process
//! creates (or adopts from an earlier interrupted run) are owned and always
//! get at least one release attempt, either explicitly after the scope's
//! actions or from the cleanup registry. A logged-on user's hive is already
//! live at `HKEY_USERS\<SID>` and is used in place without ownership.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;

use super::cleanup::{CleanupRegistry, PRIORITY_HANDLES, PRIORITY_HIVES};
use crate::error::ProvisionError;
use crate::exec::Executor;
use crate::logging::{Event, Log};
use crate::profiles::Scope;
use crate::registry::RegistryReader;
use crate::retry::Sleeper;

/// Wait before each release attempt.
pub const RELEASE_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(5),
    Duration::from_secs(3),
];

/// Pause between closing handles and unloading, for the OS to catch up.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Budget for each `reg`/`tasklist` call unless [`ResourceLifecycleManager::with_timeout`]
/// sets another.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Processes known to keep user hives open.
const LIKELY_HOLDERS: [&str; 7] = [
    "explorer.exe",
    "searchindexer.exe",
    "searchprotocolhost.exe",
    "runtimebroker.exe",
    "onedrive.exe",
    "msmpeng.exe",
    "sihost.exe",
];

/// Lifecycle state of a [`RegistryHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Not loaded (or already released).
    Unmounted,
    /// Loaded and usable.
    Mounted,
    /// A release is in progress.
    ReleasePending,
    /// Every release attempt failed; the hive stays loaded.
    ReleaseFailed,
}

/// Access to one scope's registry root.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    scope_label: String,
    root: Option<String>,
    mount: Option<String>,
    owned: bool,
    simulated: bool,
    state: Arc<Mutex<HandleState>>,
}

impl RegistryHandle {
    fn new(scope: &Scope, root: Option<String>, mount: Option<String>, owned: bool) -> Self {
        Self {
            scope_label: scope.label(),
            root,
            mount,
            owned,
            simulated: false,
            state: Arc::new(Mutex::new(HandleState::Mounted)),
        }
    }

    /// `HKEY_USERS\<name>` for profile scopes; `None` for the machine.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Label of the scope this handle belongs to.
    #[must_use]
    pub fn scope_label(&self) -> &str {
        &self.scope_label
    }

    /// Whether this run must unload the hive.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        self.owned
    }

    /// Whether the mount was only simulated (dry run).
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HandleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// What [`ResourceLifecycleManager::release`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The handle was not owned by this run; nothing to unload.
    NotOwned,
    /// Already released earlier.
    AlreadyReleased,
    /// Unloaded on the given attempt.
    Released {
        /// Attempt that succeeded.
        attempts: u32,
    },
    /// Every attempt failed; logged, never fatal.
    Failed(ProvisionError),
}

/// Loads and unloads per-scope hives.
#[derive(Debug, Clone)]
pub struct ResourceLifecycleManager {
    executor: Arc<dyn Executor>,
    registry: Arc<dyn RegistryReader>,
    sleeper: Arc<dyn Sleeper>,
    log: Arc<dyn Log>,
    dry_run: bool,
    timeout: Duration,
}

impl ResourceLifecycleManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        executor: Arc<dyn Executor>,
        registry: Arc<dyn RegistryReader>,
        sleeper: Arc<dyn Sleeper>,
        log: Arc<dyn Log>,
        dry_run: bool,
    ) -> Self {
        Self {
            executor,
            registry,
            sleeper,
            log,
            dry_run,
            timeout: TOOL_TIMEOUT,
        }
    }

    /// Bound every tool call by `timeout`; a call that exceeds it is killed
    /// and counts as failed.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Make `scope`'s registry root available.
    ///
    /// Owned mounts register their release with `cleanup`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ResourceAcquisition`] if the hive cannot be
    /// loaded.
    pub fn acquire(
        &self,
        scope: &Scope,
        cleanup: &CleanupRegistry,
    ) -> Result<RegistryHandle, ProvisionError> {
        let (Some(mount), Some(hive_path)) = (scope.mount_name(), scope.hive_path()) else {
            return Ok(RegistryHandle::new(scope, None, None, false));
        };

        if let Some(sid) = scope.security_id() {
            let live = format!(r"HKEY_USERS\{sid}");
            if self.registry.key_readable(&live) {
                self.log.event(
                    Event::info("hive", format!("using live hive at {live}"))
                        .scope(scope.label())
                        .classification("Live"),
                );
                return Ok(RegistryHandle::new(scope, Some(live), None, false));
            }
        }

        let root = format!(r"HKEY_USERS\{mount}");
        if self.dry_run {
            self.log
                .dry_run(&format!("would load {} at {root}", hive_path.display()));
            let mut handle = RegistryHandle::new(scope, Some(root), Some(mount), false);
            handle.simulated = true;
            return Ok(handle);
        }

        let exists = self.mount_exists(&mount);
        if exists && self.registry.key_readable(&root) {
            self.log.event(
                Event::info("hive", format!("reusing mounted hive {root}"))
                    .scope(scope.label())
                    .classification("Reused"),
            );
        } else {
            let mut teardown_error = None;
            if exists {
                self.log
                    .warn(&format!("{root} is mounted but unreadable, remounting"));
                self.registry.close_handles_under(&root);
                if let Err(reason) = self.unload(&root) {
                    self.log
                        .warn(&format!("could not unload stale mount {root}: {reason}"));
                    teardown_error = Some(reason);
                }
            }
            let hive = hive_path.display().to_string();
            let result = self
                .executor
                .run_with_timeout("reg", &["load", &root, &hive], self.timeout)
                .map_err(|e| format!("{e:#}"))
                .and_then(|r| if r.success { Ok(()) } else { Err(r.detail()) });
            if let Err(mut reason) = result {
                if let Some(stale) = teardown_error {
                    reason = format!("{reason} (stale mount could not be unloaded: {stale})");
                }
                let err = ProvisionError::ResourceAcquisition {
                    scope: scope.label(),
                    reason,
                };
                self.log.event(
                    Event::warn("hive", err.to_string())
                        .scope(scope.label())
                        .classification(err.kind()),
                );
                return Err(err);
            }
            self.log.event(
                Event::info("hive", format!("loaded {hive} at {root}"))
                    .scope(scope.label())
                    .classification("Mounted"),
            );
        }

        let handle = RegistryHandle::new(scope, Some(root.clone()), Some(mount), true);
        let registry = Arc::clone(&self.registry);
        let handles_root = root.clone();
        cleanup.register(
            format!("close registry handles under {root}"),
            PRIORITY_HANDLES,
            move || {
                registry.close_handles_under(&handles_root);
                Ok(())
            },
        );
        let manager = self.clone();
        let pending = handle.clone();
        cleanup.register(format!("unload {root}"), PRIORITY_HIVES, move || {
            match manager.release(&pending) {
                ReleaseOutcome::Failed(e) => Err(e.into()),
                _ => Ok(()),
            }
        });
        Ok(handle)
    }

    /// Unload an owned hive, retrying per [`RELEASE_DELAYS`].
    pub fn release(&self, handle: &RegistryHandle) -> ReleaseOutcome {
        let (Some(root), true) = (handle.root(), handle.owned) else {
            if let (true, Some(root)) = (handle.simulated, handle.root()) {
                self.log.dry_run(&format!("would unload {root}"));
            }
            return ReleaseOutcome::NotOwned;
        };
        if handle.state() != HandleState::Mounted {
            return ReleaseOutcome::AlreadyReleased;
        }
        handle.set_state(HandleState::ReleasePending);

        let mut last_error = String::new();
        for (attempt, delay) in (1u32..).zip(RELEASE_DELAYS) {
            if !delay.is_zero() {
                self.sleeper.sleep(delay);
            }
            self.registry.close_handles_under(root);
            self.sleeper.sleep(SETTLE_DELAY);
            match self.unload(root) {
                Ok(()) => {
                    handle.set_state(HandleState::Unmounted);
                    self.log.event(
                        Event::info("hive", format!("unloaded {root}"))
                            .scope(handle.scope_label())
                            .attempt(attempt)
                            .classification("Released"),
                    );
                    return ReleaseOutcome::Released { attempts: attempt };
                }
                Err(reason) => {
                    let holders = self.likely_holders();
                    let hint = if holders.is_empty() {
                        String::new()
                    } else {
                        format!(" (possible holders: {})", holders.join(", "))
                    };
                    self.log.event(
                        Event::warn("hive", format!("unload of {root} failed: {reason}{hint}"))
                            .scope(handle.scope_label())
                            .attempt(attempt)
                            .classification("ReleaseRetry"),
                    );
                    last_error = reason;
                }
            }
        }

        handle.set_state(HandleState::ReleaseFailed);
        let err = ProvisionError::ResourceRelease {
            mount: handle.mount.clone().unwrap_or_else(|| root.to_string()),
            attempts: u32::try_from(RELEASE_DELAYS.len()).unwrap_or(u32::MAX),
            reason: last_error,
        };
        self.log.event(
            Event::warn("hive", err.to_string())
                .scope(handle.scope_label())
                .classification(err.kind()),
        );
        ReleaseOutcome::Failed(err)
    }

    /// Returns `true` if `HKEY_USERS\<name>` exists and is readable.
    #[must_use]
    pub fn test(&self, name: &str) -> bool {
        self.mount_exists(name) && self.registry.key_readable(&format!(r"HKEY_USERS\{name}"))
    }

    fn mount_exists(&self, name: &str) -> bool {
        let wanted = format!(r"HKEY_USERS\{name}").to_ascii_lowercase();
        self.executor
            .run_with_timeout("reg", &["query", "HKU"], self.timeout)
            .is_ok_and(|r| {
                r.success
                    && r
                        .stdout
                        .lines()
                        .any(|l| l.trim().to_ascii_lowercase() == wanted)
            })
    }

    fn unload(&self, root: &str) -> Result<(), String> {
        let result = self
            .executor
            .run_with_timeout("reg", &["unload", root], self.timeout);
        match result {
            Ok(r) if r.success => Ok(()),
            Ok(r) => Err(r.detail()),
            Err(e) => Err(format!("{e:#}")),
        }
    }

    fn likely_holders(&self) -> Vec<String> {
        let Ok(result) = self
            .executor
            .run_with_timeout("tasklist", &["/FO", "CSV", "/NH"], self.timeout)
        else {
            return Vec::new();
        };
        let mut found: Vec<String> = result
            .stdout
            .lines()
            .filter_map(|line| line.split(',').next())
            .map(|image| image.trim_matches('"').to_ascii_lowercase())
            .filter(|image| LIKELY_HOLDERS.contains(&image.as_str()))
            .collect();
        found.sort();
        found.dedup();
        found
    }
}
