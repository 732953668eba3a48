//! Profile discovery: which per-user scopes exist on this machine.
//!
//! The OS profile index under `ProfileList` is read through a
//! [`ProfileSource`], then filtered down to real interactive accounts whose
//! profile directory still exists. The default (template) profile is always
//! yielded so that new accounts inherit per-user settings.
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::exec::Executor;
use crate::logging::Log;
use crate::operations::FileSystemOps;

const PROFILE_LIST: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\ProfileList";

/// Local accounts (`S-1-5-21-…`) and Entra ID accounts (`S-1-12-1-…`).
const USER_SID_PREFIXES: [&str; 2] = ["S-1-5-21-", "S-1-12-1-"];

/// Profile directory names that never belong to an interactive user.
const EXCLUDED_NAMES: [&str; 7] = [
    "systemprofile",
    "localservice",
    "networkservice",
    "public",
    "default",
    "default user",
    "all users",
];

/// Where a group of actions applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Machine-wide state.
    Machine,
    /// One real user account.
    UserProfile {
        /// Profile directory name.
        username: String,
        /// Account security identifier.
        security_id: String,
        /// Path to the user's `NTUSER.DAT`.
        hive_path: PathBuf,
    },
    /// The template profile copied for new accounts.
    DefaultProfile {
        /// Path to the template `NTUSER.DAT`.
        hive_path: PathBuf,
    },
}

impl Scope {
    /// Short label for logs and events.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Machine => "machine".to_string(),
            Self::UserProfile { username, .. } => format!("user {username}"),
            Self::DefaultProfile { .. } => "default profile".to_string(),
        }
    }

    /// Mount name under `HKEY_USERS` for the scope's hive; `None` for the
    /// machine.
    #[must_use]
    pub fn mount_name(&self) -> Option<String> {
        match self {
            Self::Machine => None,
            Self::UserProfile { security_id, .. } => Some(format!("WinProv_{security_id}")),
            Self::DefaultProfile { .. } => Some("WinProv_DefaultProfile".to_string()),
        }
    }

    /// Hive file backing the scope.
    #[must_use]
    pub fn hive_path(&self) -> Option<&Path> {
        match self {
            Self::Machine => None,
            Self::UserProfile { hive_path, .. } | Self::DefaultProfile { hive_path } => {
                Some(hive_path)
            }
        }
    }

    /// Security identifier of a user scope.
    #[must_use]
    pub fn security_id(&self) -> Option<&str> {
        match self {
            Self::UserProfile { security_id, .. } => Some(security_id),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One raw entry of the OS profile index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Key name under `ProfileList`.
    pub security_id: String,
    /// Expanded `ProfileImagePath`.
    pub image_path: PathBuf,
}

/// Read access to the OS profile index.
#[cfg_attr(test, mockall::automock)]
pub trait ProfileSource: Send + Sync + fmt::Debug {
    /// Every entry under `ProfileList`, unfiltered.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    fn profile_entries(&self) -> Result<Vec<ProfileEntry>>;

    /// Directory of the template profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the location cannot be determined.
    fn default_profile_dir(&self) -> Result<PathBuf>;
}

/// [`ProfileSource`] backed by `reg query`.
#[derive(Debug)]
pub struct RegProfileSource {
    executor: Arc<dyn Executor>,
}

impl RegProfileSource {
    /// Create a source that shells out through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl ProfileSource for RegProfileSource {
    fn profile_entries(&self) -> Result<Vec<ProfileEntry>> {
        let result = self
            .executor
            .run("reg", &["query", PROFILE_LIST, "/s", "/v", "ProfileImagePath"])
            .context("reading the profile list")?;
        Ok(parse_profile_list(&result.stdout))
    }

    fn default_profile_dir(&self) -> Result<PathBuf> {
        let result = self
            .executor
            .run_unchecked("reg", &["query", PROFILE_LIST, "/v", "Default"])?;
        let raw = result
            .stdout
            .lines()
            .find_map(|line| value_of(line, "Default"))
            .unwrap_or(r"%SystemDrive%\Users\Default");
        Ok(PathBuf::from(expand_env(raw)))
    }
}

/// Parse `reg query ProfileList /s /v ProfileImagePath` output.
fn parse_profile_list(stdout: &str) -> Vec<ProfileEntry> {
    let mut entries = Vec::new();
    let mut current_sid: Option<&str> = None;
    for line in stdout.lines() {
        if line.starts_with("HKEY_") {
            current_sid = line.trim().rsplit('\\').next();
        } else if let (Some(sid), Some(path)) = (current_sid, value_of(line, "ProfileImagePath")) {
            entries.push(ProfileEntry {
                security_id: sid.to_string(),
                image_path: PathBuf::from(expand_env(path)),
            });
        }
    }
    entries
}

/// Extract the data column of a `    <name>    REG_<TYPE>    <data>` line.
fn value_of<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(name)?;
    let rest = rest.trim_start().strip_prefix("REG_")?;
    let (_, data) = rest.split_once(char::is_whitespace)?;
    Some(data.trim())
}

/// Expand `%VAR%` references; unknown variables stay as written.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some((before, after)) = rest.split_once('%') {
        out.push_str(before);
        let Some((name, tail)) = after.split_once('%') else {
            out.push('%');
            rest = after;
            break;
        };
        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => {
                out.push('%');
                out.push_str(name);
                out.push('%');
            }
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

/// Last component of a Windows-style path, on any host.
fn leaf_name(path: &Path) -> String {
    let raw = path.to_string_lossy();
    raw.trim_end_matches(['\\', '/'])
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or_default()
        .to_string()
}

fn hive_file(dir: &Path) -> PathBuf {
    let raw = dir.to_string_lossy();
    PathBuf::from(format!("{}\\NTUSER.DAT", raw.trim_end_matches(['\\', '/'])))
}

fn is_excluded_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.is_empty()
        || lower.ends_with('$')
        || lower.starts_with("defaultuser")
        || EXCLUDED_NAMES.contains(&lower.as_str())
}

/// Turns the raw profile index into scopes.
#[derive(Debug)]
pub struct ProfileEnumerator {
    source: Arc<dyn ProfileSource>,
    fs: Arc<dyn FileSystemOps>,
}

impl ProfileEnumerator {
    /// Create an enumerator over `source`, checking directories through `fs`.
    #[must_use]
    pub fn new(source: Arc<dyn ProfileSource>, fs: Arc<dyn FileSystemOps>) -> Self {
        Self { source, fs }
    }

    /// Real user profiles sorted by name, followed by the default profile.
    ///
    /// An empty user list is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile index cannot be read.
    pub fn enumerate_profiles(&self, log: &dyn Log) -> Result<Vec<Scope>> {
        let mut users = Vec::new();
        for entry in self.source.profile_entries()? {
            if !USER_SID_PREFIXES
                .iter()
                .any(|p| entry.security_id.starts_with(p))
            {
                continue;
            }
            let username = leaf_name(&entry.image_path);
            if is_excluded_name(&username) {
                log.debug(&format!("skipping profile {username} ({})", entry.security_id));
                continue;
            }
            if !self.fs.exists(&entry.image_path) {
                log.debug(&format!(
                    "skipping profile {username}: {} does not exist",
                    entry.image_path.display()
                ));
                continue;
            }
            users.push(Scope::UserProfile {
                hive_path: hive_file(&entry.image_path),
                username,
                security_id: entry.security_id,
            });
        }
        users.sort_by_key(Scope::label);

        let default_dir = self.source.default_profile_dir()?;
        users.push(Scope::DefaultProfile {
            hive_path: hive_file(&default_dir),
        });
        Ok(users)
    }
}
