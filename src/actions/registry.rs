//! Registry mutation applied as a single `reg import`.
use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use super::{ActionCategory, ActionEnv, Compensation, Intent, Invocation, Prepared, Provision, Tool};
use crate::registry::path::{Hive, KeyPath};
use crate::registry::{ValueChange, regfile};

/// Set or delete values under one key.
///
/// `HKCU` paths are re-rooted onto the scope's hive, so one entry applies to
/// every profile the plan entry targets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryMutation {
    /// Key path, e.g. `HKCU\Control Panel\Desktop` or `HKLM\SOFTWARE\Policies\X`.
    pub path: String,
    /// Desired values by name; an empty name is the key's default value.
    pub values: BTreeMap<String, ValueChange>,
}

impl RegistryMutation {
    /// Parsed key path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured path is not a supported key path.
    pub fn key_path(&self) -> Result<KeyPath> {
        Ok(KeyPath::parse(&self.path)?)
    }

    /// Returns `true` if the key lives under `HKCU` and needs a user hive.
    #[must_use]
    pub fn targets_user_hive(&self) -> bool {
        self.key_path().is_ok_and(|p| p.hive == Hive::CurrentUser)
    }

    fn resolved_key(&self, env: &ActionEnv<'_>) -> Result<String> {
        Ok(self.key_path()?.resolve(env.user_root)?)
    }

    fn import(path: &std::path::Path) -> Invocation {
        Invocation::new(
            Tool::Reg,
            Intent::Configure,
            "reg",
            [
                "import".to_string(),
                path.display().to_string(),
                "/reg:64".to_string(),
            ],
        )
    }
}

impl Provision for RegistryMutation {
    fn description(&self) -> String {
        let names: Vec<&str> = self
            .values
            .keys()
            .map(|k| if k.is_empty() { "(default)" } else { k.as_str() })
            .collect();
        format!("set {} [{}]", self.path, names.join(", "))
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Registry
    }

    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool> {
        let key = self.resolved_key(env)?;
        for (name, wanted) in &self.values {
            let current = env
                .registry
                .read_value(&key, name)
                .with_context(|| format!("reading {key}\\{name}"))?;
            if !wanted.is_satisfied_by(current.as_ref()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn prepare(&self, env: &ActionEnv<'_>) -> Result<Prepared> {
        let key = self.resolved_key(env)?;

        // Snapshot before writing anything so the undo file restores the
        // exact prior state, deleting values that did not exist.
        let mut prior = Vec::with_capacity(self.values.len());
        for name in self.values.keys() {
            let current = env
                .registry
                .read_value(&key, name)
                .with_context(|| format!("snapshotting {key}\\{name}"))?;
            prior.push((name.clone(), current.map_or(ValueChange::Delete, ValueChange::Set)));
        }
        let desired: Vec<(String, ValueChange)> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let apply_file = env
            .scratch
            .write("apply", &regfile::render(&key, &desired))
            .context("writing registry import file")?;
        let restore_file = env
            .scratch
            .write("restore", &regfile::render(&key, &prior))
            .context("writing registry restore file")?;

        Ok(Prepared {
            apply: Self::import(&apply_file),
            compensation: Some(Compensation {
                description: format!("restore previous values under {key}"),
                invocation: Self::import(&restore_file),
            }),
        })
    }

    fn validate(&self) -> Result<(), String> {
        KeyPath::parse(&self.path).map_err(|e| e.to_string())?;
        if self.values.is_empty() {
            return Err(format!("registry mutation of {} has no values", self.path));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actions::testing::{MapRegistry, MemScratch, QueueExecutor};
    use crate::registry::RegistryData;

    const ROOT: &str = r"HKEY_USERS\WinProv_S-1-5-21-1-2-3-1001";

    fn mutation() -> RegistryMutation {
        let mut values = BTreeMap::new();
        values.insert(
            "MenuShowDelay".to_string(),
            ValueChange::Set(RegistryData::String("0".to_string())),
        );
        values.insert("Legacy".to_string(), ValueChange::Delete);
        RegistryMutation {
            path: r"HKCU\Control Panel\Desktop".to_string(),
            values,
        }
    }

    fn decode(bytes: &[u8]) -> String {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn satisfied_when_every_value_matches() {
        let exec = QueueExecutor::default();
        let scratch = MemScratch::default();
        let mut reg = MapRegistry::default();
        let env_for = |reg: &MapRegistry| -> bool {
            let env = ActionEnv {
                executor: &exec,
                registry: reg,
                scratch: &scratch,
                user_root: Some(ROOT),
                timeout: crate::actions::testing::QUERY_TIMEOUT,
            };
            mutation().is_already_satisfied(&env).unwrap()
        };
        assert!(!env_for(&reg));
        reg.values.insert(
            format!(r"{ROOT}\Control Panel\Desktop\MenuShowDelay"),
            RegistryData::String("0".to_string()),
        );
        assert!(env_for(&reg));
        reg.values.insert(
            format!(r"{ROOT}\Control Panel\Desktop\Legacy"),
            RegistryData::Dword(1),
        );
        assert!(!env_for(&reg), "a value marked for deletion still exists");
    }

    #[test]
    fn prepare_writes_apply_and_snapshot_files() {
        let exec = QueueExecutor::default();
        let scratch = MemScratch::default();
        let mut reg = MapRegistry::default();
        reg.values.insert(
            format!(r"{ROOT}\Control Panel\Desktop\MenuShowDelay"),
            RegistryData::String("400".to_string()),
        );
        reg.values.insert(
            format!(r"{ROOT}\Control Panel\Desktop\Legacy"),
            RegistryData::Dword(7),
        );
        let env = ActionEnv {
            executor: &exec,
            registry: &reg,
            scratch: &scratch,
            user_root: Some(ROOT),
            timeout: crate::actions::testing::QUERY_TIMEOUT,
        };

        let prepared = mutation().prepare(&env).unwrap();
        let files = scratch.files.lock().unwrap();
        assert_eq!(files.len(), 2);

        let apply = decode(&files[0].1);
        assert!(apply.contains(r"[HKEY_USERS\WinProv_S-1-5-21-1-2-3-1001\Control Panel\Desktop]"));
        assert!(apply.contains("\"MenuShowDelay\"=\"0\""));
        assert!(apply.contains("\"Legacy\"=-"));

        let restore = decode(&files[1].1);
        assert!(restore.contains("\"MenuShowDelay\"=\"400\""));
        assert!(restore.contains("\"Legacy\"=dword:00000007"));

        assert_eq!(prepared.apply.tool, Tool::Reg);
        assert_eq!(prepared.apply.args[0], "import");
        assert_eq!(prepared.apply.args[1], files[0].0.display().to_string());
        let undo = prepared.compensation.expect("registry mutations are compensable");
        assert_eq!(undo.invocation.args[1], files[1].0.display().to_string());
    }

    #[test]
    fn snapshot_deletes_values_that_did_not_exist() {
        let exec = QueueExecutor::default();
        let scratch = MemScratch::default();
        let reg = MapRegistry::default();
        let env = ActionEnv {
            executor: &exec,
            registry: &reg,
            scratch: &scratch,
            user_root: Some(ROOT),
            timeout: crate::actions::testing::QUERY_TIMEOUT,
        };
        mutation().prepare(&env).unwrap();
        let restore = decode(&scratch.files.lock().unwrap()[1].1);
        assert!(restore.contains("\"MenuShowDelay\"=-"));
    }

    #[test]
    fn user_key_without_hive_is_an_error() {
        let exec = QueueExecutor::default();
        let scratch = MemScratch::default();
        let reg = MapRegistry::default();
        let env = ActionEnv {
            executor: &exec,
            registry: &reg,
            scratch: &scratch,
            user_root: None,
            timeout: crate::actions::testing::QUERY_TIMEOUT,
        };
        assert!(mutation().is_already_satisfied(&env).is_err());
    }

    #[test]
    fn validation() {
        assert!(mutation().validate().is_ok());
        assert!(mutation().targets_user_hive());
        let empty = RegistryMutation {
            path: r"HKLM\SOFTWARE\X".to_string(),
            values: BTreeMap::new(),
        };
        assert!(empty.validate().is_err());
        assert!(!empty.targets_user_hive());
    }
}
