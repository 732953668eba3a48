//! Package install through winget and app package removal through Appx.
use anyhow::Result;
use serde::Deserialize;

use super::classify::APPX_NOTHING_MATCHED;
use super::{
    ActionCategory, ActionEnv, Compensation, Intent, Invocation, Prepared, Provision, Tool,
    validate_identifier,
};

fn default_source() -> String {
    "winget".to_string()
}

/// Install a package by exact winget id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageInstall {
    /// Exact package id, e.g. `Git.Git`.
    pub id: String,
    /// Display name for logs and the summary.
    #[serde(default)]
    pub name: Option<String>,
    /// winget source to install from.
    #[serde(default = "default_source")]
    pub source: String,
}

impl PackageInstall {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Provision for PackageInstall {
    fn description(&self) -> String {
        format!("install {}", self.label())
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::PackageInstall
    }

    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool> {
        let result = env.query(
            "winget",
            &[
                "list",
                "--id",
                &self.id,
                "--exact",
                "--accept-source-agreements",
                "--disable-interactivity",
            ],
        )?;
        // `winget list` prints a table; an exact id match appears as a token.
        Ok(result.success
            && result
                .stdout
                .lines()
                .any(|line| line.split_whitespace().any(|token| token.eq_ignore_ascii_case(&self.id))))
    }

    fn prepare(&self, _env: &ActionEnv<'_>) -> Result<Prepared> {
        let apply = Invocation::new(
            Tool::Winget,
            Intent::Add,
            "winget",
            [
                "install",
                "--id",
                self.id.as_str(),
                "--exact",
                "--source",
                self.source.as_str(),
                "--silent",
                "--accept-source-agreements",
                "--accept-package-agreements",
                "--disable-interactivity",
            ],
        );
        let undo = Invocation::new(
            Tool::Winget,
            Intent::Remove,
            "winget",
            [
                "uninstall",
                "--id",
                self.id.as_str(),
                "--exact",
                "--silent",
                "--accept-source-agreements",
                "--disable-interactivity",
            ],
        );
        Ok(Prepared {
            apply,
            compensation: Some(Compensation {
                description: format!("uninstall {}", self.label()),
                invocation: undo,
            }),
        })
    }

    fn validate(&self) -> Result<(), String> {
        validate_identifier("package id", &self.id)?;
        validate_identifier("package source", &self.source)
    }
}

/// Remove installed and provisioned app packages whose name matches a
/// wildcard pattern. Not compensable: removed packages are not restorable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageUninstall {
    /// `-like` wildcard pattern, e.g. `Microsoft.BingNews*`.
    pub pattern: String,
}

impl PackageUninstall {
    fn count_script(&self) -> String {
        let p = &self.pattern;
        format!(
            "$ErrorActionPreference='SilentlyContinue'\n\
             $i = @(Get-AppxPackage -AllUsers -Name '{p}').Count\n\
             $v = @(Get-AppxProvisionedPackage -Online | Where-Object {{ $_.DisplayName -like '{p}' }}).Count\n\
             Write-Output ($i + $v)"
        )
    }

    fn removal_script(&self) -> String {
        let p = &self.pattern;
        format!(
            "$ErrorActionPreference='Stop'\n\
             $installed = @(Get-AppxPackage -AllUsers -Name '{p}')\n\
             $provisioned = @(Get-AppxProvisionedPackage -Online | Where-Object {{ $_.DisplayName -like '{p}' }})\n\
             if ($installed.Count -eq 0 -and $provisioned.Count -eq 0) {{ exit {APPX_NOTHING_MATCHED} }}\n\
             $installed | Remove-AppxPackage -AllUsers\n\
             $provisioned | Remove-AppxProvisionedPackage -Online | Out-Null\n\
             exit 0"
        )
    }
}

impl Provision for PackageUninstall {
    fn description(&self) -> String {
        format!("remove app packages matching {}", self.pattern)
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::PackageRemoval
    }

    fn is_already_satisfied(&self, env: &ActionEnv<'_>) -> Result<bool> {
        let script = self.count_script();
        let result = env.query(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", &script],
        )?;
        Ok(result.success && result.stdout.trim() == "0")
    }

    fn prepare(&self, _env: &ActionEnv<'_>) -> Result<Prepared> {
        let script = self.removal_script();
        Ok(Prepared {
            apply: Invocation::new(
                Tool::PowerShell,
                Intent::Remove,
                "powershell",
                ["-NoProfile", "-NonInteractive", "-Command", script.as_str()],
            ),
            compensation: None,
        })
    }

    fn validate(&self) -> Result<(), String> {
        validate_identifier("package pattern", &self.pattern)
    }
}
