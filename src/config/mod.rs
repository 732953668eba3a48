//! Plan file model: engine settings, preflight thresholds and the ordered
//! list of actions.
pub mod loader;
pub mod plan;
pub mod settings;

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

pub use plan::{PlanEntry, ScopeSelector};
pub use settings::{EngineSettings, PreflightRequirements};

/// A complete plan file. Missing sections take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    /// `[settings]`
    #[serde(default)]
    pub settings: EngineSettings,
    /// `[preflight]`
    #[serde(default)]
    pub preflight: PreflightRequirements,
    /// `[[actions]]`, applied in file order.
    #[serde(default)]
    pub actions: Vec<PlanEntry>,
}

impl PlanFile {
    /// Load a plan from `path` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let plan: Self = loader::load_file(path)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Validate every section and entry.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        self.preflight.validate()?;
        for (index, entry) in self.actions.iter().enumerate() {
            entry.validate(index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::loader::{Format, parse_str};

    #[test]
    fn empty_plan_is_valid() {
        let plan: PlanFile = parse_str("", Format::Toml, "empty").unwrap();
        assert!(plan.actions.is_empty());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn invalid_entry_fails_validation() {
        let plan: PlanFile = parse_str(
            "[[actions]]\nkind = \"package_install\"\nid = \"\"\n",
            Format::Toml,
            "inline",
        )
        .unwrap();
        assert!(matches!(plan.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let parsed = parse_str::<PlanFile>("[extras]\na = 1\n", Format::Toml, "inline");
        assert!(parsed.is_err());
    }
}
