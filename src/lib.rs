//! Transactional Windows provisioning engine.
//!
//! Applies a plan of machine-mutating actions (package installs and
//! removals, optional-capability removal, per-profile registry changes,
//! service disabling) through the stock Windows command-line tools, with
//! guaranteed cleanup and best-effort rollback.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: plan files (TOML or JSON) and engine settings
//! - **[`actions`]**: idempotent check/prepare primitives, one tool call each
//! - **[`engine`]**: hive lifecycle, retries, cleanup, rollback and the run
//!   state machine
//! - **[`commands`]**: top-level subcommands (`run`, `preflight`, `profiles`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod actions;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod logging;
pub mod operations;
pub mod platform;
pub mod profiles;
pub mod registry;
pub mod retry;
