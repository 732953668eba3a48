//! Exit classification, one mapping function per external tool.
//!
//! Tools report "nothing to do" in tool-specific ways, often as a non-zero
//! exit code, and whether that means success depends on what the caller was
//! trying to do. Each tool therefore gets its own mapping from
//! `(intent, exit status, output)` to an [`ExitClassification`].
use std::fmt;

use crate::exec::ExecResult;

/// Typed interpretation of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClassification {
    /// The tool made the requested change.
    Success,
    /// The machine was already in the requested state.
    AlreadyInPriorState,
    /// The failure may go away on retry.
    TransientFailure,
    /// Retrying cannot help.
    PermanentFailure,
}

impl ExitClassification {
    /// Returns `true` for the two outcomes that leave the machine in the
    /// requested state.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::AlreadyInPriorState)
    }
}

impl fmt::Display for ExitClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::AlreadyInPriorState => "AlreadyInPriorState",
            Self::TransientFailure => "TransientFailure",
            Self::PermanentFailure => "PermanentFailure",
        };
        f.write_str(s)
    }
}

/// What an invocation is trying to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Add something (install a package, re-add a capability).
    Add,
    /// Remove or disable something.
    Remove,
    /// Change configuration in place.
    Configure,
}

/// External tools the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// `winget`
    Winget,
    /// `dism`
    Dism,
    /// `reg`
    Reg,
    /// `sc`
    ServiceControl,
    /// `powershell` driving the Appx cmdlets.
    PowerShell,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Winget => "winget",
            Self::Dism => "dism",
            Self::Reg => "reg",
            Self::ServiceControl => "sc",
            Self::PowerShell => "powershell",
        };
        f.write_str(s)
    }
}

// winget (APPINSTALLER_CLI_ERROR_*)
const WINGET_DOWNLOAD_FAILED: u32 = 0x8A15_0008;
const WINGET_NO_APPLICATIONS_FOUND: u32 = 0x8A15_0014;
const WINGET_UPDATE_NOT_APPLICABLE: u32 = 0x8A15_002B;
const WINGET_PACKAGE_ALREADY_INSTALLED: u32 = 0x8A15_0061;
const WINGET_INSTALL_PACKAGE_IN_USE: u32 = 0x8A15_0101;
const WINGET_INSTALL_IN_PROGRESS: u32 = 0x8A15_0102;
const WINGET_INSTALL_FILE_IN_USE: u32 = 0x8A15_0103;
const WINGET_INSTALL_NO_NETWORK: u32 = 0x8A15_0107;
const WINGET_INSTALL_REBOOT_TO_FINISH: u32 = 0x8A15_0109;
const WINGET_INSTALL_ALREADY_INSTALLED: u32 = 0x8A15_010D;
const WINGET_INSTALL_BLOCKED_BY_POLICY: u32 = 0x8A15_010F;

// DISM
const ERROR_SUCCESS_REBOOT_REQUIRED: u32 = 3010;
const CBS_E_UNKNOWN_UPDATE: u32 = 0x800F_080C;
const CBS_E_SOURCE_MISSING: u32 = 0x800F_081F;
const CBS_E_DOWNLOAD_SOURCE: u32 = 0x800F_0906;
const CBS_E_INSTALLERS_FAILED: u32 = 0x800F_0922;
const ERROR_SERVICE_BUSY: u32 = 0x8007_0420;

// sc.exe (Win32 error codes)
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;
const ERROR_SERVICE_MARKED_FOR_DELETE: u32 = 1072;
const ERROR_SERVICE_DATABASE_LOCKED: u32 = 1055;

// Appx deployment HRESULTs
const ERROR_INSTALL_PACKAGE_NOT_FOUND: u32 = 0x8007_3CF1;
const ERROR_PACKAGES_IN_USE: u32 = 0x8007_3D02;
const ERROR_INSTALL_FAILED: u32 = 0x8007_3CF9;
const E_ACCESSDENIED: u32 = 0x8007_0005;

/// Classification for exit codes no mapping knows about.
///
/// Treated as transient so the retry budget bounds them.
const UNKNOWN_CODE: ExitClassification = ExitClassification::TransientFailure;

/// Exit code the Appx removal script uses when no package matched.
pub const APPX_NOTHING_MATCHED: i32 = 3;

/// Reinterpret a process exit code as the unsigned value Windows reports.
///
/// HRESULT failures arrive as negative `i32` codes.
#[must_use]
pub const fn unsigned_code(code: i32) -> u32 {
    u32::from_ne_bytes(code.to_ne_bytes())
}

impl Tool {
    /// Classify one invocation of this tool.
    ///
    /// A timed-out process is always transient.
    #[must_use]
    pub fn classify(self, intent: Intent, result: &ExecResult) -> ExitClassification {
        if result.timed_out {
            return ExitClassification::TransientFailure;
        }
        if result.success {
            return ExitClassification::Success;
        }
        let Some(code) = result.code else {
            // Killed by a signal or otherwise without a code.
            return ExitClassification::TransientFailure;
        };
        match self {
            Self::Winget => classify_winget(intent, unsigned_code(code)),
            Self::Dism => classify_dism(intent, unsigned_code(code)),
            Self::Reg => classify_reg(intent, &result.detail()),
            Self::ServiceControl => classify_sc(intent, unsigned_code(code)),
            Self::PowerShell => classify_appx(code, &result.detail()),
        }
    }
}

fn classify_winget(intent: Intent, code: u32) -> ExitClassification {
    use ExitClassification::{AlreadyInPriorState, PermanentFailure, Success, TransientFailure};
    match code {
        WINGET_PACKAGE_ALREADY_INSTALLED
        | WINGET_INSTALL_ALREADY_INSTALLED
        | WINGET_UPDATE_NOT_APPLICABLE
            if intent == Intent::Add =>
        {
            AlreadyInPriorState
        }
        WINGET_NO_APPLICATIONS_FOUND if intent == Intent::Remove => AlreadyInPriorState,
        WINGET_NO_APPLICATIONS_FOUND | WINGET_INSTALL_BLOCKED_BY_POLICY => PermanentFailure,
        WINGET_INSTALL_REBOOT_TO_FINISH => Success,
        WINGET_DOWNLOAD_FAILED
        | WINGET_INSTALL_PACKAGE_IN_USE
        | WINGET_INSTALL_IN_PROGRESS
        | WINGET_INSTALL_FILE_IN_USE
        | WINGET_INSTALL_NO_NETWORK => TransientFailure,
        _ => UNKNOWN_CODE,
    }
}

fn classify_dism(intent: Intent, code: u32) -> ExitClassification {
    use ExitClassification::{AlreadyInPriorState, PermanentFailure, Success, TransientFailure};
    match code {
        ERROR_SUCCESS_REBOOT_REQUIRED => Success,
        CBS_E_UNKNOWN_UPDATE if intent == Intent::Remove => AlreadyInPriorState,
        CBS_E_UNKNOWN_UPDATE | CBS_E_SOURCE_MISSING | E_ACCESSDENIED => PermanentFailure,
        CBS_E_DOWNLOAD_SOURCE | CBS_E_INSTALLERS_FAILED | ERROR_SERVICE_BUSY => TransientFailure,
        _ => UNKNOWN_CODE,
    }
}

fn classify_reg(intent: Intent, detail: &str) -> ExitClassification {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("access is denied") {
        ExitClassification::PermanentFailure
    } else if lower.contains("unable to find") {
        if intent == Intent::Remove {
            ExitClassification::AlreadyInPriorState
        } else {
            ExitClassification::PermanentFailure
        }
    } else if lower.contains("invalid syntax") || lower.contains("not a registry script") {
        ExitClassification::PermanentFailure
    } else {
        // "Error accessing the registry" and sharing violations clear up
        // once the holder lets go.
        ExitClassification::TransientFailure
    }
}

fn classify_sc(intent: Intent, code: u32) -> ExitClassification {
    match code {
        ERROR_SERVICE_DOES_NOT_EXIST | ERROR_SERVICE_MARKED_FOR_DELETE if intent == Intent::Remove => {
            ExitClassification::AlreadyInPriorState
        }
        ERROR_SERVICE_DOES_NOT_EXIST | ERROR_ACCESS_DENIED => ExitClassification::PermanentFailure,
        ERROR_SERVICE_DATABASE_LOCKED => ExitClassification::TransientFailure,
        _ => UNKNOWN_CODE,
    }
}

fn classify_appx(code: i32, detail: &str) -> ExitClassification {
    if code == APPX_NOTHING_MATCHED {
        return ExitClassification::AlreadyInPriorState;
    }
    let hresult = |value: u32| {
        detail.contains(&format!("0x{value:08X}")) || detail.contains(&format!("0x{value:08x}"))
    };
    if hresult(ERROR_INSTALL_PACKAGE_NOT_FOUND) {
        ExitClassification::AlreadyInPriorState
    } else if hresult(ERROR_PACKAGES_IN_USE) {
        ExitClassification::TransientFailure
    } else if hresult(E_ACCESSDENIED) || hresult(ERROR_INSTALL_FAILED) {
        ExitClassification::PermanentFailure
    } else {
        UNKNOWN_CODE
    }
}
