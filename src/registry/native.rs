//! Native [`RegistryReader`] using the `winreg` crate.
//!
//! Opened keys are cached so repeated idempotency checks against one key do
//! not reopen it. The cache is what makes explicit handle release matter:
//! a cached key under a mounted hive keeps `reg unload` from succeeding.
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use anyhow::Result;
use winreg::RegKey;
use winreg::enums::{
    HKEY_LOCAL_MACHINE, HKEY_USERS, KEY_READ, REG_BINARY, REG_DWORD, REG_EXPAND_SZ, REG_MULTI_SZ,
    REG_QWORD, REG_SZ,
};

use super::{RegistryData, RegistryReader};

/// [`RegistryReader`] over native registry handles.
#[derive(Debug, Default)]
pub struct WinregReader {
    cache: Mutex<HashMap<String, RegKey>>,
}

impl WinregReader {
    /// Create a reader with an empty handle cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_key<T>(&self, key: &str, f: impl FnOnce(&RegKey) -> io::Result<T>) -> io::Result<T> {
        let normalized = key.to_ascii_uppercase();
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| io::Error::other("registry handle cache poisoned"))?;
        if let Some(handle) = cache.get(&normalized) {
            return f(handle);
        }
        let handle = open(key)?;
        let out = f(&handle);
        cache.insert(normalized, handle);
        out
    }
}

fn open(key: &str) -> io::Result<RegKey> {
    let (root, sub) = key.split_once('\\').unwrap_or((key, ""));
    let predef = match root.to_ascii_uppercase().as_str() {
        "HKEY_LOCAL_MACHINE" | "HKLM" => RegKey::predef(HKEY_LOCAL_MACHINE),
        "HKEY_USERS" | "HKU" => RegKey::predef(HKEY_USERS),
        _ => return Err(io::Error::from(io::ErrorKind::InvalidInput)),
    };
    predef.open_subkey_with_flags(sub, KEY_READ)
}

fn read(key: &RegKey, name: &str) -> io::Result<Option<RegistryData>> {
    let raw = match key.get_raw_value(name) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let data = match raw.vtype {
        REG_DWORD => RegistryData::Dword(key.get_value(name)?),
        REG_QWORD => RegistryData::Qword(key.get_value(name)?),
        REG_SZ => RegistryData::String(key.get_value(name)?),
        REG_EXPAND_SZ => RegistryData::ExpandString(key.get_value(name)?),
        REG_MULTI_SZ => RegistryData::MultiString(key.get_value(name)?),
        REG_BINARY => RegistryData::Binary(raw.bytes.to_vec()),
        _ => return Ok(None),
    };
    Ok(Some(data))
}

impl RegistryReader for WinregReader {
    fn read_value(&self, key: &str, name: &str) -> Result<Option<RegistryData>> {
        match self.with_key(key, |handle| read(handle, name)) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn key_readable(&self, key: &str) -> bool {
        open(key).is_ok()
    }

    fn close_handles_under(&self, root: &str) {
        let prefix = root.to_ascii_uppercase();
        if let Ok(mut cache) = self.cache.lock() {
            // Dropping a RegKey closes its handle.
            cache.retain(|k, _| !(k == &prefix || k.starts_with(&format!("{prefix}\\"))));
        }
    }
}
