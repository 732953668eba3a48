//! Environment checks that must pass before anything is mutated.
//!
//! Every check runs (no short-circuit) and none is retried. Critical checks
//! abort the run; the rest only warn.
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};

use crate::config::PreflightRequirements;
use crate::exec::Executor;
use crate::logging::{Event, Log};
use crate::platform::Platform;

/// Throw-away key used by the registry write probe.
const PROBE_KEY: &str = r"HKLM\SOFTWARE\WinProvPreflightProbe";

/// Integrity levels that mean the token is elevated.
const ELEVATED_LABELS: [&str; 2] = ["S-1-16-12288", "S-1-16-16384"];

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Queries the preflight battery needs from the host.
#[cfg_attr(test, mockall::automock)]
pub trait SystemProbe: Send + Sync + fmt::Debug {
    /// Whether the process runs with an elevated token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be inspected.
    fn is_elevated(&self) -> Result<bool>;

    /// Windows build number.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be determined.
    fn os_build(&self) -> Result<u32>;

    /// Whether `tool` is on `PATH`.
    fn has_tool(&self, tool: &str) -> bool;

    /// Free bytes on the system volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume cannot be queried.
    fn free_disk_bytes(&self) -> Result<u64>;

    /// Available physical memory in MiB.
    ///
    /// # Errors
    ///
    /// Returns an error if memory cannot be queried.
    fn available_memory_mb(&self) -> Result<u64>;

    /// Create and delete a throw-away key under `HKLM`.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails.
    fn registry_write_probe(&self) -> Result<()>;

    /// Version string reported by the package tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool does not answer.
    fn package_tool_version(&self) -> Result<String>;

    /// Whether `url` answers within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is unreachable.
    fn reach(&self, url: &str, timeout: Duration) -> Result<()>;
}

/// [`SystemProbe`] for the local host.
#[derive(Debug)]
pub struct HostProbe {
    executor: Arc<dyn Executor>,
    platform: Platform,
}

impl HostProbe {
    /// Create a probe that shells out through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, platform: Platform) -> Self {
        Self { executor, platform }
    }

    fn powershell_number(&self, expr: &str) -> Result<u64> {
        let out = self
            .executor
            .run("powershell", &["-NoProfile", "-NonInteractive", "-Command", expr])?;
        out.stdout
            .trim()
            .parse()
            .with_context(|| format!("unexpected output from '{expr}': {}", out.stdout.trim()))
    }
}

impl SystemProbe for HostProbe {
    fn is_elevated(&self) -> Result<bool> {
        if self.platform.is_windows() {
            let out = self.executor.run("whoami", &["/groups"])?;
            Ok(ELEVATED_LABELS.iter().any(|l| out.stdout.contains(l)))
        } else {
            let out = self.executor.run("id", &["-u"])?;
            Ok(out.stdout.trim() == "0")
        }
    }

    fn os_build(&self) -> Result<u32> {
        if !self.platform.is_windows() {
            bail!("not running on Windows");
        }
        let out = self.executor.run("cmd", &["/c", "ver"])?;
        parse_build(&out.stdout)
            .with_context(|| format!("unexpected 'ver' output: {}", out.stdout.trim()))
    }

    fn has_tool(&self, tool: &str) -> bool {
        self.executor.which(tool)
    }

    fn free_disk_bytes(&self) -> Result<u64> {
        let volume = self.platform.system_volume();
        if self.platform.is_windows() {
            let drive = drive_letter(&volume).context("system volume has no drive letter")?;
            self.powershell_number(&format!("(Get-PSDrive -Name {drive}).Free"))
        } else {
            let root = volume.display().to_string();
            let out = self.executor.run("df", &["-Pk", &root])?;
            let avail_kb: u64 = out
                .stdout
                .lines()
                .nth(1)
                .and_then(|l| l.split_whitespace().nth(3))
                .context("unexpected df output")?
                .parse()?;
            Ok(avail_kb * 1024)
        }
    }

    fn available_memory_mb(&self) -> Result<u64> {
        if self.platform.is_windows() {
            let kb = self.powershell_number(
                "(Get-CimInstance Win32_OperatingSystem).FreePhysicalMemory",
            )?;
            Ok(kb / 1024)
        } else {
            let meminfo =
                std::fs::read_to_string("/proc/meminfo").context("reading /proc/meminfo")?;
            let kb: u64 = meminfo
                .lines()
                .find_map(|l| l.strip_prefix("MemAvailable:"))
                .and_then(|rest| rest.split_whitespace().next())
                .context("MemAvailable missing")?
                .parse()?;
            Ok(kb / 1024)
        }
    }

    fn registry_write_probe(&self) -> Result<()> {
        self.executor
            .run("reg", &["add", PROBE_KEY, "/f"])
            .context("creating probe key")?;
        self.executor
            .run("reg", &["delete", PROBE_KEY, "/f"])
            .context("deleting probe key")?;
        Ok(())
    }

    fn package_tool_version(&self) -> Result<String> {
        let out = self.executor.run("winget", &["--version"])?;
        Ok(out.stdout.trim().to_string())
    }

    fn reach(&self, url: &str, timeout: Duration) -> Result<()> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);
        match agent.head(url).call() {
            // Any HTTP answer proves reachability.
            Ok(_) | Err(ureq::Error::StatusCode(_)) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("reaching {url}")),
        }
    }
}

/// Build number from `Microsoft Windows [Version 10.0.19045.3803]`.
fn parse_build(ver: &str) -> Option<u32> {
    let (_, rest) = ver.split_once("Version ")?;
    let version = rest.split(']').next()?;
    version.split('.').nth(2)?.parse().ok()
}

fn drive_letter(volume: &Path) -> Option<char> {
    volume
        .to_string_lossy()
        .chars()
        .next()
        .filter(char::is_ascii_alphabetic)
}

/// Outcome of the preflight battery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    /// `true` when every critical check passed.
    pub passed: bool,
    /// Names of failed critical checks.
    pub failed_checks: Vec<String>,
    /// Advisory findings.
    pub warnings: Vec<String>,
}

/// Runs the preflight battery.
#[derive(Debug)]
pub struct PreflightValidator {
    probe: Arc<dyn SystemProbe>,
    log: Arc<dyn Log>,
}

impl PreflightValidator {
    /// Create a validator over `probe`.
    #[must_use]
    pub fn new(probe: Arc<dyn SystemProbe>, log: Arc<dyn Log>) -> Self {
        Self { probe, log }
    }

    /// Run every check against `req`.
    #[must_use]
    pub fn validate(&self, req: &PreflightRequirements) -> PreflightReport {
        let mut report = PreflightReport::default();

        self.critical(&mut report, "elevation", || match self.probe.is_elevated() {
            Ok(true) => Ok(()),
            Ok(false) => bail!("process is not elevated"),
            Err(e) => Err(e),
        });

        self.critical(&mut report, "os-build", || {
            let build = self.probe.os_build()?;
            if build < req.min_os_build {
                bail!("build {build} is older than {}", req.min_os_build);
            }
            Ok(())
        });

        self.critical(&mut report, "required-tools", || {
            let missing: Vec<&str> = req
                .required_tools
                .iter()
                .map(String::as_str)
                .filter(|t| !self.probe.has_tool(t))
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                bail!("missing: {}", missing.join(", "))
            }
        });

        self.critical(&mut report, "registry-probe", || self.probe.registry_write_probe());

        self.critical(&mut report, "package-tool", || {
            let version = self.probe.package_tool_version()?;
            self.log.debug(&format!("package tool version {version}"));
            Ok(())
        });

        self.advisory(&mut report, "free-disk", || {
            let free = self.probe.free_disk_bytes()?;
            if free < req.min_free_disk_gb.saturating_mul(BYTES_PER_GB) {
                bail!(
                    "{} GiB free, {} GiB recommended",
                    free / BYTES_PER_GB,
                    req.min_free_disk_gb
                );
            }
            Ok(())
        });

        self.advisory(&mut report, "memory", || {
            let mb = self.probe.available_memory_mb()?;
            if mb < req.min_memory_mb {
                bail!("{mb} MiB available, {} MiB recommended", req.min_memory_mb);
            }
            Ok(())
        });

        self.advisory(&mut report, "network", || {
            self.probe.reach(
                &req.repository_url,
                Duration::from_secs(req.network_timeout_secs),
            )
        });

        report.passed = report.failed_checks.is_empty();
        report
    }

    fn critical(&self, report: &mut PreflightReport, name: &str, check: impl FnOnce() -> Result<()>) {
        match check() {
            Ok(()) => self.log.debug(&format!("preflight {name}: ok")),
            Err(e) => {
                self.log.event(
                    Event::error("preflight", format!("{name}: {e:#}")).classification("Critical"),
                );
                report.failed_checks.push(name.to_string());
            }
        }
    }

    fn advisory(&self, report: &mut PreflightReport, name: &str, check: impl FnOnce() -> Result<()>) {
        match check() {
            Ok(()) => self.log.debug(&format!("preflight {name}: ok")),
            Err(e) => {
                let msg = format!("{name}: {e:#}");
                self.log
                    .event(Event::warn("preflight", msg.clone()).classification("Advisory"));
                report.warnings.push(msg);
            }
        }
    }
}
