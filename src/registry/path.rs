//! Registry key paths and their resolution against a scope's root.
use std::fmt;

use crate::error::ConfigError;

/// Root hive a configured key path starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hive {
    /// `HKEY_LOCAL_MACHINE`
    LocalMachine,
    /// `HKEY_CURRENT_USER`, re-rooted onto the scope's mounted hive.
    CurrentUser,
}

impl Hive {
    const fn full_name(self) -> &'static str {
        match self {
            Self::LocalMachine => "HKEY_LOCAL_MACHINE",
            Self::CurrentUser => "HKEY_CURRENT_USER",
        }
    }
}

/// A parsed registry key path such as `HKCU\Software\Foo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    /// Root hive.
    pub hive: Hive,
    /// Path below the hive, without leading or trailing separators.
    pub subkey: String,
}

impl KeyPath {
    /// Parse a key path.
    ///
    /// Accepts the short (`HKLM`, `HKCU`), long (`HKEY_LOCAL_MACHINE`) and
    /// PowerShell drive (`HKLM:`) spellings, with `\` or `/` separators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown hives or an empty subkey.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let normalized = raw.trim().replace('/', "\\");
        let (head, rest) = normalized
            .split_once('\\')
            .unwrap_or((normalized.as_str(), ""));
        let hive = match head.trim_end_matches(':').to_ascii_uppercase().as_str() {
            "HKLM" | "HKEY_LOCAL_MACHINE" => Hive::LocalMachine,
            "HKCU" | "HKEY_CURRENT_USER" => Hive::CurrentUser,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported registry hive '{other}' in '{raw}'"
                )));
            }
        };
        let subkey = rest.trim_matches('\\').to_string();
        if subkey.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "registry path '{raw}' has no subkey"
            )));
        }
        Ok(Self { hive, subkey })
    }

    /// Resolve to an absolute path usable with `reg.exe`.
    ///
    /// `user_root` is the scope's hive root (e.g. `HKEY_USERS\WinProv_S-1-5-21-…`)
    /// and is required for `HKCU` paths. Machine paths ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an `HKCU` path is resolved
    /// without a user root.
    pub fn resolve(&self, user_root: Option<&str>) -> Result<String, ConfigError> {
        match (self.hive, user_root) {
            (Hive::LocalMachine, _) => Ok(format!("{}\\{}", Hive::LocalMachine.full_name(), self.subkey)),
            (Hive::CurrentUser, Some(root)) => Ok(format!("{root}\\{}", self.subkey)),
            (Hive::CurrentUser, None) => Err(ConfigError::Invalid(format!(
                "'{self}' targets a user hive but the scope has none"
            ))),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self.hive {
            Hive::LocalMachine => "HKLM",
            Hive::CurrentUser => "HKCU",
        };
        write!(f, "{short}\\{}", self.subkey)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_spellings() {
        for raw in [
            r"HKCU\Software\Foo",
            r"HKCU:\Software\Foo",
            r"hkey_current_user\Software\Foo\",
            "HKCU/Software/Foo",
        ] {
            let path = KeyPath::parse(raw).unwrap();
            assert_eq!(path.hive, Hive::CurrentUser, "{raw}");
            assert_eq!(path.subkey, r"Software\Foo", "{raw}");
        }
        assert_eq!(
            KeyPath::parse(r"HKLM:\SYSTEM\X").unwrap().hive,
            Hive::LocalMachine
        );
    }

    #[test]
    fn rejects_unknown_hive_and_empty_subkey() {
        assert!(KeyPath::parse(r"HKCR\.txt").is_err());
        assert!(KeyPath::parse("HKCU").is_err());
        assert!(KeyPath::parse(r"HKLM:\").is_err());
    }

    #[test]
    fn user_path_is_rerooted() {
        let path = KeyPath::parse(r"HKCU\Control Panel\Desktop").unwrap();
        assert_eq!(
            path.resolve(Some(r"HKEY_USERS\WinProv_DefaultProfile"))
                .unwrap(),
            r"HKEY_USERS\WinProv_DefaultProfile\Control Panel\Desktop"
        );
        assert!(path.resolve(None).is_err());
    }

    #[test]
    fn machine_path_ignores_user_root() {
        let path = KeyPath::parse(r"HKLM\SOFTWARE\Policies").unwrap();
        assert_eq!(
            path.resolve(Some(r"HKEY_USERS\X")).unwrap(),
            r"HKEY_LOCAL_MACHINE\SOFTWARE\Policies"
        );
    }

    #[test]
    fn display_uses_short_form() {
        let path = KeyPath::parse(r"HKEY_LOCAL_MACHINE\SOFTWARE\X").unwrap();
        assert_eq!(path.to_string(), r"HKLM\SOFTWARE\X");
    }
}
