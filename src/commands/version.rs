//! Command: print version information.

/// Print the winprov version to stdout.
#[allow(clippy::print_stdout)]
pub fn run() {
    println!("winprov {}", super::version_string());
}
