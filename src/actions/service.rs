//! Service disabling through `sc`.
use anyhow::Result;
use serde::Deserialize;

use super::classify::unsigned_code;
use super::{
    ActionCategory, ActionEnv, Compensation, Intent, Invocation, Prepared, Provision, Tool,
    validate_identifier,
};

const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;

/// Disable a Windows service by setting its start type to `disabled`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceDisable {
    /// Service key name, e.g. `DiagTrack`.
    pub name: String,
}

/// Start type as `sc config start=` spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartType {
    /// `boot`
    Boot,
    /// `system`
    System,
    /// `auto`
    Auto,
    /// `delayed-auto`
    DelayedAuto,
    /// `demand`
    Demand,
    /// `disabled`
    Disabled,
}

impl StartType {
    /// Argument value for `sc config <name> start= <value>`.
    #[must_use]
    pub const fn as_sc_arg(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::System => "system",
            Self::Auto => "auto",
            Self::DelayedAuto => "delayed-auto",
            Self::Demand => "demand",
            Self::Disabled => "disabled",
        }
    }

    /// Parse the `START_TYPE` line of `sc qc` output.
    #[must_use]
    pub fn from_qc_output(stdout: &str) -> Option<Self> {
        let line = stdout
            .lines()
            .find(|l| l.trim_start().starts_with("START_TYPE"))?;
        let (_, value) = line.split_once(':')?;
        let delayed = value.contains("DELAYED");
        match value.split_whitespace().next()? {
            "0" => Some(Self::Boot),
            "1" => Some(Self::System),
            "2" if delayed => Some(Self::DelayedAuto),
            "2" => Some(Self::Auto),
            "3" => Some(Self::Demand),
            "4" => Some(Self::Disabled),
            _ => None,
        }
    }
}

enum Observed {
    Missing,
    Start(StartType),
    Unknown,
}

impl ServiceDisable {
    fn observe(&self, env: &ActionEnv<'_>) -> Result<Observed> {
        let result = env.query("sc", &["qc", &self.name])?;
        if result.success {
            return Ok(StartType::from_qc_output(&result.stdout).map_or(Observed::Unknown, Observed::Start));
        }
        if result.code.map(unsigned_code) == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
            return Ok(Observed::Missing);
        }
        Ok(Observed::Unknown)
    }

    fn config(&self, intent: Intent, start: StartType) -> Invocation {
        Invocation::new(
            Tool::ServiceControl,
            intent,
            "sc",
            ["config", self.name.as_str(), "start=", start.as_sc_arg()],
        )
    }
}

impl Provision for ServiceDisable {
    fn description(&self) -> String {
        format!("disable service {}", self.name)
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Service
    }

    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool> {
        Ok(matches!(
            self.observe(env)?,
            Observed::Missing | Observed::Start(StartType::Disabled)
        ))
    }

    fn prepare(&self, env: &ActionEnv<'_>) -> Result<Prepared> {
        let compensation = match self.observe(env)? {
            Observed::Start(prior) if prior != StartType::Disabled => Some(Compensation {
                description: format!(
                    "restore start type '{}' of service {}",
                    prior.as_sc_arg(),
                    self.name
                ),
                invocation: self.config(Intent::Configure, prior),
            }),
            _ => None,
        };
        Ok(Prepared {
            apply: self.config(Intent::Remove, StartType::Disabled),
            compensation,
        })
    }

    fn validate(&self) -> Result<(), String> {
        validate_identifier("service name", &self.name)
    }
}
