//! Domain-specific error types for the provisioning engine.
//!
//! Internal modules return typed errors while command handlers at the CLI
//! boundary convert them to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error taxonomy
//!
//! ```text
//! ProvisionError
//! ├── CriticalPreflight     critical environment check failed, nothing mutated
//! ├── ResourceAcquisition   a scope's hive could not be mounted (non-fatal)
//! ├── TransientAction       retries exhausted on a transient failure
//! ├── PermanentAction       the tool reported a failure retries cannot fix
//! ├── ResourceRelease       a hive could not be unloaded (logged only)
//! └── RollbackCompensation  a compensating action failed (logged only)
//! ConfigError               plan-file I/O, parse and validation errors
//! ```
use thiserror::Error;

/// Error taxonomy of a provisioning run.
///
/// Only [`ProvisionError::CriticalPreflight`] and the action failures of
/// mandatory actions escalate to a failing exit code; the rest are recorded
/// and logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// One or more critical preflight checks failed.
    #[error("Critical preflight checks failed: {}", failed.join(", "))]
    CriticalPreflight {
        /// Names of the failed critical checks.
        failed: Vec<String>,
    },

    /// A per-scope registry resource could not be acquired.
    #[error("Could not acquire registry hive for {scope}: {reason}")]
    ResourceAcquisition {
        /// Label of the affected scope.
        scope: String,
        /// Human-readable reason.
        reason: String,
    },

    /// An action kept failing transiently until its attempts ran out.
    #[error("'{action}' failed after {attempts} attempt(s): {reason}")]
    TransientAction {
        /// Description of the action.
        action: String,
        /// Attempts made.
        attempts: u32,
        /// Last observed failure.
        reason: String,
    },

    /// An action failed in a way retrying cannot fix.
    #[error("'{action}' failed permanently: {reason}")]
    PermanentAction {
        /// Description of the action.
        action: String,
        /// Failure detail reported by the tool.
        reason: String,
    },

    /// A mounted hive could not be released.
    #[error("Could not release hive {mount} after {attempts} attempt(s): {reason}")]
    ResourceRelease {
        /// Mount name under `HKEY_USERS`.
        mount: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure detail.
        reason: String,
    },

    /// A compensating action failed during rollback.
    #[error("Rollback of '{description}' failed: {reason}")]
    RollbackCompensation {
        /// Description of the compensated action.
        description: String,
        /// Failure detail.
        reason: String,
    },
}

impl ProvisionError {
    /// Short machine-friendly name of the error kind, used in structured events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CriticalPreflight { .. } => "CriticalPreflightFailure",
            Self::ResourceAcquisition { .. } => "ResourceAcquisitionFailure",
            Self::TransientAction { .. } => "TransientActionFailure",
            Self::PermanentAction { .. } => "PermanentActionFailure",
            Self::ResourceRelease { .. } => "ResourceReleaseFailure",
            Self::RollbackCompensation { .. } => "RollbackCompensationFailure",
        }
    }
}

/// Errors that arise from loading and validating a plan file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading the plan file.
    #[error("IO error reading plan file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The plan file is not valid TOML or JSON for the plan schema.
    #[error("Invalid plan file {path}: {message}")]
    Parse {
        /// Path to the offending file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The plan file extension maps to no supported format.
    #[error("Unsupported plan format '{0}': expected .toml or .json")]
    UnsupportedFormat(String),

    /// A value parsed but is outside its allowed range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::io;

    // -----------------------------------------------------------------------
    // ProvisionError
    // -----------------------------------------------------------------------

    #[test]
    fn critical_preflight_lists_checks() {
        let e = ProvisionError::CriticalPreflight {
            failed: vec!["elevation".to_string(), "os_build".to_string()],
        };
        assert_eq!(
            e.to_string(),
            "Critical preflight checks failed: elevation, os_build"
        );
    }

    #[test]
    fn resource_acquisition_display() {
        let e = ProvisionError::ResourceAcquisition {
            scope: "user alice".to_string(),
            reason: "hive in use".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Could not acquire registry hive for user alice: hive in use"
        );
    }

    #[test]
    fn transient_action_display() {
        let e = ProvisionError::TransientAction {
            action: "install Git.Git".to_string(),
            attempts: 3,
            reason: "download failed".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "'install Git.Git' failed after 3 attempt(s): download failed"
        );
    }

    #[test]
    fn permanent_action_display() {
        let e = ProvisionError::PermanentAction {
            action: "remove capability X".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "'remove capability X' failed permanently: not found"
        );
    }

    #[test]
    fn resource_release_display() {
        let e = ProvisionError::ResourceRelease {
            mount: "WinProv_DefaultProfile".to_string(),
            attempts: 3,
            reason: "access denied".to_string(),
        };
        assert!(e.to_string().contains("WinProv_DefaultProfile"));
        assert!(e.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn rollback_compensation_display() {
        let e = ProvisionError::RollbackCompensation {
            description: "install Git.Git".to_string(),
            reason: "uninstall failed".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Rollback of 'install Git.Git' failed: uninstall failed"
        );
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            ProvisionError::CriticalPreflight { failed: vec![] }.kind(),
            ProvisionError::ResourceAcquisition {
                scope: String::new(),
                reason: String::new(),
            }
            .kind(),
            ProvisionError::TransientAction {
                action: String::new(),
                attempts: 1,
                reason: String::new(),
            }
            .kind(),
            ProvisionError::PermanentAction {
                action: String::new(),
                reason: String::new(),
            }
            .kind(),
            ProvisionError::ResourceRelease {
                mount: String::new(),
                attempts: 1,
                reason: String::new(),
            }
            .kind(),
            ProvisionError::RollbackCompensation {
                description: String::new(),
                reason: String::new(),
            }
            .kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }

    // -----------------------------------------------------------------------
    // ConfigError
    // -----------------------------------------------------------------------

    #[test]
    fn config_error_io_display() {
        let e = ConfigError::Io {
            path: "plan.toml".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(e.to_string().contains("plan.toml"));
        assert!(e.to_string().contains("IO error reading plan file"));
    }

    #[test]
    fn config_error_io_has_source() {
        use std::error::Error as StdError;
        let e = ConfigError::Io {
            path: "plan.toml".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        assert!(e.source().is_some());
    }

    #[test]
    fn config_error_unsupported_format_display() {
        let e = ConfigError::UnsupportedFormat("yaml".to_string());
        assert_eq!(
            e.to_string(),
            "Unsupported plan format 'yaml': expected .toml or .json"
        );
    }

    // -----------------------------------------------------------------------
    // Send + Sync bounds
    // -----------------------------------------------------------------------

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<ProvisionError>();
        assert_send_sync::<ConfigError>();
    }

    #[test]
    fn errors_convert_to_anyhow() {
        let _a: anyhow::Error = ConfigError::Invalid("x".to_string()).into();
        let _b: anyhow::Error = ProvisionError::CriticalPreflight { failed: vec![] }.into();
    }
}
