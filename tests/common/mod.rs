// Shared helpers for integration tests.
//
// Provides scripted stand-ins for every engine seam (process execution,
// registry reads, filesystem, host probe, profile index) so a whole run can
// be driven without touching the machine.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code, clippy::expect_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;

use winprov::config::PlanFile;
use winprov::config::loader::{Format, parse_str};
use winprov::engine::Services;
use winprov::engine::preflight::SystemProbe;
use winprov::exec::{ExecResult, Executor};
use winprov::logging::MemoryLog;
use winprov::operations::FileSystemOps;
use winprov::profiles::{ProfileEntry, ProfileSource};
use winprov::registry::{RegistryData, RegistryReader};
use winprov::retry::RecordingSleeper;

/// Reinterpret an HRESULT as the signed exit code Windows reports.
pub fn hresult(code: u32) -> i32 {
    i32::from_ne_bytes(code.to_ne_bytes())
}

/// Parse and validate a TOML plan.
pub fn plan(src: &str) -> PlanFile {
    let plan: PlanFile = parse_str(src, Format::Toml, "test.toml").expect("parse plan");
    plan.validate().expect("valid plan");
    plan
}

/// Executor that answers commands from scripted rules.
///
/// A rule matches when its needle is a substring of `program args...`; the
/// first matching rule with results left answers. Unmatched commands succeed
/// with empty output. Safe to call from several worker threads.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, VecDeque<ExecResult>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `results` for commands containing `needle`.
    pub fn on(&self, needle: &str, results: impl IntoIterator<Item = ExecResult>) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((needle.to_string(), results.into_iter().collect()));
        self
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of command lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

impl Executor for ScriptedExecutor {
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let line = format!("{program} {}", args.join(" "));
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let scripted = rules
            .iter_mut()
            .filter(|(needle, queue)| line.contains(needle.as_str()) && !queue.is_empty())
            .find_map(|(_, queue)| queue.pop_front());
        Ok(scripted.unwrap_or_else(|| ExecResult::ok("")))
    }

    fn which(&self, _program: &str) -> bool {
        true
    }
}

/// Registry reader over fixed values; keys are readable only when listed.
#[derive(Debug, Default)]
pub struct FixedRegistry {
    pub values: HashMap<String, RegistryData>,
    pub readable: HashSet<String>,
}

impl RegistryReader for FixedRegistry {
    fn read_value(&self, key: &str, name: &str) -> Result<Option<RegistryData>> {
        Ok(self.values.get(&format!("{key}\\{name}")).cloned())
    }

    fn key_readable(&self, key: &str) -> bool {
        self.readable.contains(key)
    }

    fn close_handles_under(&self, _root: &str) {}
}

/// Probe reporting a healthy host, optionally without elevation.
#[derive(Debug)]
pub struct StaticProbe {
    pub elevated: bool,
}

impl SystemProbe for StaticProbe {
    fn is_elevated(&self) -> Result<bool> {
        Ok(self.elevated)
    }

    fn os_build(&self) -> Result<u32> {
        Ok(22631)
    }

    fn has_tool(&self, _tool: &str) -> bool {
        true
    }

    fn free_disk_bytes(&self) -> Result<u64> {
        Ok(256 * 1024 * 1024 * 1024)
    }

    fn available_memory_mb(&self) -> Result<u64> {
        Ok(16384)
    }

    fn registry_write_probe(&self) -> Result<()> {
        Ok(())
    }

    fn package_tool_version(&self) -> Result<String> {
        Ok("v1.9.25200".to_string())
    }

    fn reach(&self, _url: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Profile index with fixed entries and `C:\Users\Default` as template.
#[derive(Debug, Default)]
pub struct StaticProfiles {
    pub entries: Vec<ProfileEntry>,
}

impl StaticProfiles {
    /// One real user, `alice`, with SID `S-1-5-21-1-2-3-1001`.
    pub fn alice() -> Self {
        Self {
            entries: vec![ProfileEntry {
                security_id: ALICE_SID.to_string(),
                image_path: PathBuf::from(r"C:\Users\alice"),
            }],
        }
    }
}

pub const ALICE_SID: &str = "S-1-5-21-1-2-3-1001";

impl ProfileSource for StaticProfiles {
    fn profile_entries(&self) -> Result<Vec<ProfileEntry>> {
        Ok(self.entries.clone())
    }

    fn default_profile_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(r"C:\Users\Default"))
    }
}

/// In-memory filesystem; every directory passed to `with_dir` exists.
#[derive(Debug, Default)]
pub struct MemFs {
    dirs: Mutex<HashSet<PathBuf>>,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemFs {
    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into());
        self
    }

    /// Contents of `path`, if it was written.
    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl FileSystemOps for MemFs {
    fn exists(&self, path: &Path) -> bool {
        self.is_file(path)
            || self
                .dirs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    fn create_scratch_dir(&self) -> io::Result<PathBuf> {
        let dir = PathBuf::from("/scratch/winprov-it");
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dir.clone());
        Ok(dir)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p, _| !p.starts_with(path));
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }
}

/// Stand-in for a host whose state changes as tools run against it.
///
/// Installed packages, removed capabilities, service start types and
/// registry values are remembered, so a second run sees what the first one
/// did. `reg import` applies the `.reg` file the run wrote to `fs`.
#[derive(Debug)]
pub struct StatefulHost {
    fs: Arc<MemFs>,
    packages: Mutex<HashSet<String>>,
    removed_capabilities: Mutex<HashSet<String>>,
    start_types: Mutex<HashMap<String, String>>,
    values: Mutex<HashMap<String, RegistryData>>,
    calls: Mutex<Vec<String>>,
}

impl StatefulHost {
    pub fn new(fs: Arc<MemFs>) -> Self {
        Self {
            fs,
            packages: Mutex::default(),
            removed_capabilities: Mutex::default(),
            start_types: Mutex::default(),
            values: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn answer(&self, program: &str, args: &[&str]) -> ExecResult {
        match (program, args) {
            ("winget", ["list", "--id", id, ..]) => {
                if self.is_installed(id) {
                    ExecResult::ok(format!("Name Id Version\r\n{id} {id} 1.0\r\n"))
                } else {
                    ExecResult::failed(hresult(0x8A15_0014), "No installed package found")
                }
            }
            ("winget", ["install", "--id", id, ..]) => {
                self.packages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert((*id).to_string());
                ExecResult::ok("Successfully installed")
            }
            ("dism", [_, verb, name, ..]) => {
                let name = name.trim_start_matches("/CapabilityName:").to_string();
                let mut removed = self
                    .removed_capabilities
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match *verb {
                    "/Remove-Capability" => {
                        removed.insert(name);
                    }
                    "/Add-Capability" => {
                        removed.remove(&name);
                    }
                    _ => {
                        let state = if removed.contains(&name) { "Not Present" } else { "Installed" };
                        return ExecResult::ok(format!("Capability Identity : {name}\r\nState : {state}\r\n"));
                    }
                }
                ExecResult::ok("The operation completed successfully.")
            }
            ("sc", ["qc", name]) => {
                let start = self
                    .start_types
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(*name)
                    .cloned()
                    .unwrap_or_else(|| "auto".to_string());
                let line = if start == "disabled" { "4   DISABLED" } else { "2   AUTO_START" };
                ExecResult::ok(format!("SERVICE_NAME: {name}\r\n        START_TYPE         : {line}\r\n"))
            }
            ("sc", ["config", name, "start=", start]) => {
                self.start_types
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert((*name).to_string(), (*start).to_string());
                ExecResult::ok("[SC] ChangeServiceConfig SUCCESS")
            }
            ("reg", ["import", path, ..]) => match self.fs.read(Path::new(path)) {
                Some(bytes) => {
                    self.import(&bytes);
                    ExecResult::ok("The operation completed successfully.")
                }
                None => ExecResult::failed(1, "ERROR: Error opening the file."),
            },
            _ => ExecResult::ok(""),
        }
    }

    /// Apply the dword, string and delete lines of a UTF-16LE `.reg` file.
    fn import(&self, bytes: &[u8]) {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .skip(1)
            .map(|pair| u16::from_le_bytes(pair.try_into().expect("two bytes")))
            .collect();
        let text = String::from_utf16(&units).expect("utf-16 .reg file");
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        let mut key = String::new();
        for line in text.lines() {
            if let Some(k) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                key = k.to_string();
                continue;
            }
            let Some((lhs, rhs)) = line.split_once('=') else {
                continue;
            };
            let name = if lhs == "@" { "" } else { lhs.trim_matches('"') };
            let full = format!("{key}\\{name}");
            if rhs == "-" {
                values.remove(&full);
            } else if let Some(hex) = rhs.strip_prefix("dword:") {
                let value = u32::from_str_radix(hex, 16).expect("dword data");
                values.insert(full, RegistryData::Dword(value));
            } else if rhs.starts_with('"') {
                values.insert(full, RegistryData::String(rhs.trim_matches('"').to_string()));
            }
        }
    }
}

impl Executor for StatefulHost {
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{program} {}", args.join(" ")));
        Ok(self.answer(program, args))
    }

    fn which(&self, _program: &str) -> bool {
        true
    }
}

impl RegistryReader for StatefulHost {
    fn read_value(&self, key: &str, name: &str) -> Result<Option<RegistryData>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&format!("{key}\\{name}"))
            .cloned())
    }

    fn key_readable(&self, key: &str) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .any(|k| k.starts_with(key))
    }

    fn close_handles_under(&self, _root: &str) {}
}

/// Services over a [`StatefulHost`] on an elevated, healthy machine.
pub fn stateful_services(host: &Arc<StatefulHost>, fs: &Arc<MemFs>, log: &Arc<MemoryLog>) -> Services {
    Services {
        executor: Arc::clone(host) as _,
        registry: Arc::clone(host) as _,
        fs: Arc::clone(fs) as _,
        sleeper: Arc::new(RecordingSleeper::new()),
        log: Arc::clone(log) as _,
        probe: Arc::new(StaticProbe { elevated: true }),
        profiles: Arc::new(StaticProfiles::alice()),
    }
}

/// Everything a scenario needs to drive and inspect one run.
#[derive(Debug)]
pub struct Harness {
    pub exec: Arc<ScriptedExecutor>,
    pub log: Arc<MemoryLog>,
    pub sleeper: Arc<RecordingSleeper>,
    pub fs: Arc<MemFs>,
    pub services: Services,
}

impl Harness {
    /// Elevated healthy host with `alice` and the default profile.
    pub fn new() -> Self {
        Self::build(true, FixedRegistry::default())
    }

    /// Host whose process is not elevated.
    pub fn unelevated() -> Self {
        Self::build(false, FixedRegistry::default())
    }

    pub fn build(elevated: bool, registry: FixedRegistry) -> Self {
        let exec = Arc::new(ScriptedExecutor::new());
        let log = Arc::new(MemoryLog::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let fs = Arc::new(MemFs::default().with_dir(r"C:\Users\alice"));
        let services = Services {
            executor: Arc::clone(&exec) as _,
            registry: Arc::new(registry),
            fs: Arc::clone(&fs) as _,
            sleeper: Arc::clone(&sleeper) as _,
            log: Arc::clone(&log) as _,
            probe: Arc::new(StaticProbe { elevated }),
            profiles: Arc::new(StaticProfiles::alice()),
        };
        Self {
            exec,
            log,
            sleeper,
            fs,
            services,
        }
    }
}
