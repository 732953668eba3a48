//! Top-level subcommand handlers.
//!
//! Each handler loads what it needs, wires the production services and
//! returns the process exit code; errors propagate as [`anyhow::Error`] and
//! are mapped to exit codes in `main`.
pub mod preflight;
pub mod profiles;
pub mod run;
pub mod version;

/// Version string embedded at build time, falling back to the crate version.
#[must_use]
pub fn version_string() -> &'static str {
    option_env!("WINPROV_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}
