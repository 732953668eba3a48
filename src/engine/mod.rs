//! The transactional core: hive lifecycle, guaranteed cleanup, rollback,
//! retrying action execution and the run state machine.
pub mod cleanup;
pub mod context;
pub mod hive;
pub mod orchestrator;
pub mod preflight;
pub mod rollback;
pub mod runner;
pub mod scratch;
pub mod summary;

pub use context::Services;
pub use orchestrator::{EXIT_ABORTED, EXIT_FAILURE, EXIT_SUCCESS, Orchestrator, RunReport, RunState};
pub use summary::ExecutionSummary;
