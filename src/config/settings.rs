//! Engine tuning and preflight thresholds.
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// `[settings]` section of a plan file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Attempts per action, including the first.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_backoff_secs: f64,
    /// Growth factor per further retry.
    pub backoff_multiplier: f64,
    /// Cap on any single wait.
    pub max_backoff_secs: f64,
    /// Time budget for one tool invocation.
    pub action_timeout_secs: u64,
    /// Worker threads for package batches.
    pub workers: usize,
    /// Run compensations after a mandatory action fails.
    pub rollback: bool,
    /// Log what would happen without mutating anything.
    pub dry_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_secs: policy.initial_delay.as_secs_f64(),
            backoff_multiplier: policy.backoff_multiplier,
            max_backoff_secs: policy.max_delay.as_secs_f64(),
            action_timeout_secs: policy.timeout.as_secs(),
            workers: 3,
            rollback: true,
            dry_run: false,
        }
    }
}

impl EngineSettings {
    /// Retry policy described by these settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for negative or non-finite durations,
    /// or a policy that fails [`RetryPolicy::validate`].
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let secs = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value)
                .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative number")))
        };
        let policy = RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: secs("initial_backoff_secs", self.initial_backoff_secs)?,
            backoff_multiplier: self.backoff_multiplier,
            max_delay: secs("max_backoff_secs", self.max_backoff_secs)?,
            timeout: Duration::from_secs(self.action_timeout_secs),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy()?;
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// `[preflight]` section of a plan file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightRequirements {
    /// Lowest acceptable Windows build number.
    pub min_os_build: u32,
    /// Free space required on the system volume (advisory).
    pub min_free_disk_gb: u64,
    /// Physical memory available (advisory).
    pub min_memory_mb: u64,
    /// URL probed for package repository reachability (advisory).
    pub repository_url: String,
    /// Executables that must be on `PATH`.
    pub required_tools: Vec<String>,
    /// Timeout for the reachability probe.
    pub network_timeout_secs: u64,
}

impl Default for PreflightRequirements {
    fn default() -> Self {
        Self {
            // Windows 10 20H1
            min_os_build: 19041,
            min_free_disk_gb: 10,
            min_memory_mb: 2048,
            repository_url: "https://cdn.winget.microsoft.com/cache".to_string(),
            required_tools: ["winget", "dism", "reg", "sc", "powershell"]
                .map(String::from)
                .to_vec(),
            network_timeout_secs: 10,
        }
    }
}

impl PreflightRequirements {
    /// Check the thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty repository URL or tool
    /// name, or a zero network timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository_url.trim().is_empty() {
            return Err(ConfigError::Invalid("repository_url must not be empty".to_string()));
        }
        if self.required_tools.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("required_tools contains an empty name".to_string()));
        }
        if self.network_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "network_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
