//! Optional capability removal through DISM.
use anyhow::Result;
use serde::Deserialize;

use super::{
    ActionCategory, ActionEnv, Compensation, Intent, Invocation, Prepared, Provision, Tool,
    validate_identifier,
};

/// Remove an optional Windows capability (Features on Demand).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CapabilityRemoval {
    /// Full capability name, e.g. `App.StepsRecorder~~~~0.0.1.0`.
    pub name: String,
}

impl CapabilityRemoval {
    fn invocation(&self, intent: Intent, verb: &str) -> Invocation {
        Invocation::new(
            Tool::Dism,
            intent,
            "dism",
            [
                "/Online".to_string(),
                format!("/{verb}-Capability"),
                format!("/CapabilityName:{}", self.name),
                "/NoRestart".to_string(),
                "/English".to_string(),
            ],
        )
    }
}

/// Read the `State :` line of `dism /Get-CapabilityInfo` output.
fn capability_state(stdout: &str) -> Option<&str> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "State").then(|| value.trim())
    })
}

impl Provision for CapabilityRemoval {
    fn description(&self) -> String {
        format!("remove capability {}", self.name)
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Capability
    }

    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool> {
        let name_arg = format!("/CapabilityName:{}", self.name);
        let result = env.query(
            "dism",
            &["/Online", "/Get-CapabilityInfo", &name_arg, "/English"],
        )?;
        Ok(result.success
            && capability_state(&result.stdout)
                .is_some_and(|state| state.eq_ignore_ascii_case("Not Present")))
    }

    fn prepare(&self, _env: &ActionEnv<'_>) -> Result<Prepared> {
        Ok(Prepared {
            apply: self.invocation(Intent::Remove, "Remove"),
            compensation: Some(Compensation {
                description: format!("re-add capability {}", self.name),
                invocation: self.invocation(Intent::Add, "Add"),
            }),
        })
    }

    fn validate(&self) -> Result<(), String> {
        validate_identifier("capability name", &self.name)
    }
}
