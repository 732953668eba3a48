//! Registry value model, read access and `.reg` rendering.
//!
//! Reads go through the [`RegistryReader`] seam; writes are never made
//! value-by-value but by importing a generated `.reg` file (see
//! [`regfile`]), so one mutation is one tool invocation.
pub mod path;
pub mod regfile;

#[cfg(windows)]
pub mod native;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::exec::Executor;

/// Typed registry value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryData {
    /// `REG_DWORD`
    Dword(u32),
    /// `REG_QWORD`
    Qword(u64),
    /// `REG_SZ`
    String(String),
    /// `REG_EXPAND_SZ`
    ExpandString(String),
    /// `REG_MULTI_SZ`
    MultiString(Vec<String>),
    /// `REG_BINARY`
    Binary(Vec<u8>),
}

impl fmt::Display for RegistryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dword(v) => write!(f, "dword:{v}"),
            Self::Qword(v) => write!(f, "qword:{v}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::ExpandString(s) => write!(f, "expand:\"{s}\""),
            Self::MultiString(items) => write!(f, "multi:{items:?}"),
            Self::Binary(bytes) => write!(f, "binary:{} bytes", bytes.len()),
        }
    }
}

/// Desired state of one value in a registry mutation.
///
/// Plan files write plain integers (`DWORD`, or `QWORD` above `u32::MAX`),
/// plain strings (`REG_SZ`), or an explicit `{ type = "...", data = ... }`
/// table for the other types and for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawValue")]
pub enum ValueChange {
    /// Create or overwrite the value.
    Set(RegistryData),
    /// Delete the value if present.
    Delete,
}

impl ValueChange {
    /// Returns `true` when `current` already matches this desired state.
    #[must_use]
    pub fn is_satisfied_by(&self, current: Option<&RegistryData>) -> bool {
        match self {
            Self::Set(wanted) => current == Some(wanted),
            Self::Delete => current.is_none(),
        }
    }
}

impl fmt::Display for ValueChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(data) => data.fmt(f),
            Self::Delete => write!(f, "<deleted>"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(u64),
    Text(String),
    Typed(TypedValue),
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum TypedValue {
    Dword(u32),
    Qword(u64),
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    Delete,
}

impl From<RawValue> for ValueChange {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Number(n) => Self::Set(
                u32::try_from(n).map_or(RegistryData::Qword(n), RegistryData::Dword),
            ),
            RawValue::Text(s) => Self::Set(RegistryData::String(s)),
            RawValue::Typed(TypedValue::Dword(v)) => Self::Set(RegistryData::Dword(v)),
            RawValue::Typed(TypedValue::Qword(v)) => Self::Set(RegistryData::Qword(v)),
            RawValue::Typed(TypedValue::String(s)) => Self::Set(RegistryData::String(s)),
            RawValue::Typed(TypedValue::ExpandString(s)) => {
                Self::Set(RegistryData::ExpandString(s))
            }
            RawValue::Typed(TypedValue::MultiString(items)) => {
                Self::Set(RegistryData::MultiString(items))
            }
            RawValue::Typed(TypedValue::Delete) => Self::Delete,
        }
    }
}

/// Read access to registry values.
pub trait RegistryReader: Send + Sync + fmt::Debug {
    /// Read `name` under the absolute `key` (empty name is the default value).
    ///
    /// Returns `Ok(None)` when the key or the value does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the value exists but cannot be read.
    fn read_value(&self, key: &str, name: &str) -> Result<Option<RegistryData>>;

    /// Returns `true` when the absolute `key` exists and can be opened for reading.
    fn key_readable(&self, key: &str) -> bool;

    /// Close every handle this reader holds at or below `root`.
    ///
    /// Must be called before a hive mounted at `root` is unloaded.
    fn close_handles_under(&self, root: &str);
}

/// Budget for one `reg query`; a query that exceeds it reads as absent.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// [`RegistryReader`] backed by `reg query`.
///
/// Holds no handles between calls, so closing is a no-op.
#[derive(Debug, Clone)]
pub struct RegQueryReader {
    executor: Arc<dyn Executor>,
}

impl RegQueryReader {
    /// Create a reader that shells out through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl RegistryReader for RegQueryReader {
    fn read_value(&self, key: &str, name: &str) -> Result<Option<RegistryData>> {
        let result = if name.is_empty() {
            self.executor
                .run_with_timeout("reg", &["query", key, "/ve"], READ_TIMEOUT)?
        } else {
            self.executor
                .run_with_timeout("reg", &["query", key, "/v", name], READ_TIMEOUT)?
        };
        if !result.success {
            if result.detail().to_ascii_lowercase().contains("access is denied") {
                bail!("access denied reading {key}\\{name}");
            }
            return Ok(None);
        }
        Ok(parse_query_output(&result.stdout, name))
    }

    fn key_readable(&self, key: &str) -> bool {
        self.executor
            .run_with_timeout("reg", &["query", key], READ_TIMEOUT)
            .is_ok_and(|r| r.success)
    }

    fn close_handles_under(&self, _root: &str) {}
}

/// Extract `name` from `reg query` output.
///
/// Value lines are indented and their columns are separated by four spaces:
/// `    Name    REG_DWORD    0x1`. The default value is listed as
/// `(Default)` or a localized equivalent, so for an empty `name` the first
/// value line wins.
#[must_use]
pub fn parse_query_output(stdout: &str, name: &str) -> Option<RegistryData> {
    stdout
        .lines()
        .filter(|line| line.starts_with("    "))
        .find_map(|line| {
            let mut cols = line.trim_start().splitn(3, "    ");
            let value_name = cols.next()?;
            let kind = cols.next()?.trim();
            let data = cols.next().unwrap_or("").trim_end();
            let matches = if name.is_empty() {
                value_name.starts_with('(')
            } else {
                value_name.eq_ignore_ascii_case(name)
            };
            if matches { parse_data(kind, data) } else { None }
        })
}

fn parse_data(kind: &str, data: &str) -> Option<RegistryData> {
    match kind {
        "REG_DWORD" => parse_hex(data)
            .and_then(|v| u32::try_from(v).ok())
            .map(RegistryData::Dword),
        "REG_QWORD" => parse_hex(data).map(RegistryData::Qword),
        "REG_SZ" => Some(RegistryData::String(data.to_string())),
        "REG_EXPAND_SZ" => Some(RegistryData::ExpandString(data.to_string())),
        "REG_MULTI_SZ" => Some(RegistryData::MultiString(
            data.split("\\0")
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        "REG_BINARY" => parse_binary(data).map(RegistryData::Binary),
        _ => None,
    }
}

fn parse_hex(data: &str) -> Option<u64> {
    let digits = data
        .strip_prefix("0x")
        .or_else(|| data.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

fn parse_binary(data: &str) -> Option<Vec<u8>> {
    if data.len() % 2 != 0 {
        return None;
    }
    (0..data.len())
        .step_by(2)
        .map(|i| data.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}
