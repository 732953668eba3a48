//! `winprov` command-line entry point.
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use winprov::cli::{Cli, Command};
use winprov::commands;
use winprov::engine::{EXIT_ABORTED, EXIT_FAILURE, EXIT_SUCCESS};
use winprov::error::ConfigError;
use winprov::logging::{self, Logger};

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();
    let command = args.command.name();
    logging::init_subscriber(args.verbose, command);
    let log = Arc::new(Logger::new(command));

    // In-flight tools finish; the orchestrator stops scheduling and cleans up.
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        log.warn(&format!("could not install Ctrl-C handler: {e}"));
    }

    let result = match &args.command {
        Command::Run(opts) => commands::run::run(opts, &log, interrupt),
        Command::Preflight(opts) => commands::preflight::run(opts, &log),
        Command::Profiles => commands::profiles::run(&log).map(|()| EXIT_SUCCESS),
        Command::Version => {
            commands::version::run();
            Ok(EXIT_SUCCESS)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log.error(&format!("{e:#}"));
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_ABORTED)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}
