//! Host platform detection.
use std::fmt;
use std::path::PathBuf;

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    /// Linux or another Unix-like system (dry runs and development only).
    Linux,
    /// Windows, the only platform that can actually be provisioned.
    Windows,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// Platform information for the current system.
#[derive(Debug, Clone)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
}

impl Platform {
    /// Detect the current platform.
    #[must_use]
    pub const fn detect() -> Self {
        Self {
            os: Self::detect_os(),
        }
    }

    /// Create a platform with an explicit OS (for testing).
    #[must_use]
    pub const fn new(os: Os) -> Self {
        Self { os }
    }

    /// Returns `true` on Windows.
    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }

    /// Root of the volume that holds the OS, used for the free-space check.
    #[must_use]
    pub fn system_volume(&self) -> PathBuf {
        match self.os {
            Os::Windows => {
                let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
                PathBuf::from(format!("{drive}\\"))
            }
            Os::Linux => PathBuf::from("/"),
        }
    }

    const fn detect_os() -> Os {
        if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            // Other Unix-like systems behave like Linux for our purposes
            Os::Linux
        }
    }
}
