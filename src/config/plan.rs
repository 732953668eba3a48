//! Plan entries: an action, the scopes it targets, and whether it is mandatory.
use std::fmt;

use serde::Deserialize;

use crate::actions::{Action, Provision};
use crate::error::ConfigError;
use crate::profiles::Scope;

/// Which scopes a plan entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSelector {
    /// The machine itself (`HKLM`, packages, services).
    #[default]
    Machine,
    /// Every real user profile on the machine.
    AllUserProfiles,
    /// The template profile new users are created from.
    DefaultProfile,
    /// Every user profile plus the default profile.
    AllProfiles,
}

impl ScopeSelector {
    /// Returns `true` if `scope` is targeted.
    #[must_use]
    pub const fn matches(self, scope: &Scope) -> bool {
        matches!(
            (self, scope),
            (Self::Machine, Scope::Machine)
                | (
                    Self::AllUserProfiles | Self::AllProfiles,
                    Scope::UserProfile { .. }
                )
                | (Self::DefaultProfile | Self::AllProfiles, Scope::DefaultProfile { .. })
        )
    }

    /// Returns `true` for selectors that target per-user hives.
    #[must_use]
    pub const fn is_per_user(self) -> bool {
        !matches!(self, Self::Machine)
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Machine => "machine",
            Self::AllUserProfiles => "all_user_profiles",
            Self::DefaultProfile => "default_profile",
            Self::AllProfiles => "all_profiles",
        };
        f.write_str(s)
    }
}

/// One `[[actions]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanEntry {
    /// Targeted scopes.
    #[serde(default)]
    pub scope: ScopeSelector,
    /// A failure of a mandatory action halts the run and triggers rollback.
    #[serde(default)]
    pub mandatory: bool,
    /// The action itself, tagged by `kind`.
    #[serde(flatten)]
    pub action: Action,
}

impl PlanEntry {
    /// Check the action and that its kind fits the selected scope.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the entry by position.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let fail = |msg: String| ConfigError::Invalid(format!("actions[{index}]: {msg}"));
        self.action.validate().map_err(fail)?;
        match &self.action {
            Action::RegistryMutation(m) => {
                if m.targets_user_hive() != self.scope.is_per_user() {
                    return Err(fail(format!(
                        "registry path '{}' does not fit scope '{}': HKCU paths need a \
                         profile scope, HKLM paths need 'machine'",
                        m.path, self.scope
                    )));
                }
            }
            _ if self.scope.is_per_user() => {
                return Err(fail(format!(
                    "'{}' can only target the machine scope",
                    self.action.description()
                )));
            }
            _ => {}
        }
        Ok(())
    }
}
