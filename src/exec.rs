//! External process boundary.
//!
//! Every action reaches the machine through exactly one command-line tool.
//! The [`Executor`] trait is the seam that lets the engine run against a
//! scripted executor in tests and [`SystemExecutor`] in production.
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, bail};

/// How often a running child is polled while waiting for its timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the pipe readers of a killed child get to finish.
///
/// Grandchildren that inherited the pipes can hold them open indefinitely.
/// A reader still running after this is detached and exits once the last
/// holder closes its end.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Process exit code, if the process exited normally.
    pub code: Option<i32>,
    /// The process exceeded its time budget and was terminated.
    pub timed_out: bool,
}

impl ExecResult {
    /// A successful result with the given standard output.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            success: true,
            code: Some(0),
            ..Self::default()
        }
    }

    /// A failed result with the given exit code and standard error.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            code: Some(code),
            ..Self::default()
        }
    }

    /// A result for a process that was killed after exceeding its timeout.
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    /// Combined, trimmed output for diagnostics.
    ///
    /// Several Windows tools (winget, DISM) write their diagnostics to
    /// stdout rather than stderr, so both streams are included.
    #[must_use]
    pub fn detail(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (_, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
            timed_out: false,
        }
    }
}

/// Abstraction over process execution.
///
/// Production code uses [`SystemExecutor`]; tests substitute scripted
/// implementations so no real tool is ever launched.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run a command and return its output. Fails if the command exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exits non-zero.
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let result = self.run_unchecked(program, args)?;
        if !result.success {
            bail!(
                "{program} failed (exit {}): {}",
                result.code.unwrap_or(-1),
                result.detail()
            );
        }
        Ok(result)
    }

    /// Run a command, allowing failure (returns result without bailing).
    ///
    /// # Errors
    ///
    /// Returns an error only if the process cannot be spawned.
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a command with a time budget, terminating it when exceeded.
    ///
    /// A terminated process yields an [`ExecResult`] with `timed_out` set.
    /// The default implementation ignores the budget.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process cannot be spawned.
    fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExecResult> {
        let _ = timeout;
        self.run_unchecked(program, args)
    }

    /// Check if a program is available on PATH.
    fn which(&self, program: &str) -> bool;
}

/// [`Executor`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to execute: {program}"))?;
        Ok(ExecResult::from(output))
    }

    fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExecResult> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute: {program}"))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for: {program}"))?
            {
                return Ok(ExecResult {
                    stdout: collect(stdout),
                    stderr: collect(stderr),
                    success: status.success(),
                    code: status.code(),
                    timed_out: false,
                });
            }
            if Instant::now() >= deadline {
                terminate(&mut child);
                let grace = Instant::now() + READER_GRACE;
                let mut result = ExecResult::timeout();
                result.stdout = join_within(stdout, grace).unwrap_or_default();
                result.stderr = join_within(stderr, grace).unwrap_or_default();
                return Ok(result);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).ok();
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    handle
        .join()
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

/// Collect a reader's output if it finishes by `deadline`; otherwise detach it.
fn join_within(handle: JoinHandle<Vec<u8>>, deadline: Instant) -> Option<String> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Some(collect(handle))
}

/// Kill a timed-out child, including its process tree on Windows.
fn terminate(child: &mut Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .ok();
    }
    child.kill().ok();
    child.wait().ok();
}
