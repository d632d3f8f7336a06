//! Process execution behind the [`Executor`] trait.
use anyhow::{Context, Result, bail};
use std::io::{Read, Write as _};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::{Duration, Instant};

/// Poll interval while waiting on a child with a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,
    /// Whether the process was killed for exceeding its deadline.
    pub timed_out: bool,
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

/// Abstraction over process execution so appliers can be unit-tested.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run a program and fail if it exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or exits non-zero.
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a program, returning its result even when it exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error only if the program cannot be spawned.
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a program with `input` written to its standard input.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or exits non-zero.
    fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<ExecResult>;

    /// Run `command` through `/bin/sh -c`, optionally in `cwd`, killing it
    /// once `timeout` elapses.  Non-zero exits are returned, not raised.
    ///
    /// # Errors
    ///
    /// Returns an error only if the shell cannot be spawned or waited on.
    fn run_shell(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult>;

    /// Check if a program is available on `PATH`.
    fn which(&self, program: &str) -> bool;
}

/// Production [`Executor`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

/// Execute a command and return the result, bailing on non-zero exit.
fn execute_checked(mut cmd: Command, label: &str) -> Result<ExecResult> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to execute: {label}"))?;
    let result = ExecResult::from(output);
    if !result.success {
        bail!(
            "{label} failed (exit {}): {}",
            result.code.unwrap_or(-1),
            result.stderr.trim()
        );
    }
    Ok(result)
}

impl Executor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        execute_checked(cmd, program)
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute: {program}"))?;
        Ok(ExecResult::from(output))
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<ExecResult> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute: {program}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .with_context(|| format!("writing stdin of {program}"))?;
        }
        let result = ExecResult::from(
            child
                .wait_with_output()
                .with_context(|| format!("waiting for {program}"))?,
        );
        if !result.success {
            bail!(
                "{program} failed (exit {}): {}",
                result.code.unwrap_or(-1),
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    fn run_shell(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let Some(limit) = timeout else {
            let output = cmd
                .output()
                .with_context(|| format!("failed to execute: {command}"))?;
            return Ok(ExecResult::from(output));
        };

        // Own process group so a timeout kills the whole shell pipeline.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute: {command}"))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let deadline = Instant::now() + limit;

        // Pipes are drained while polling: a child blocked on a full pipe
        // never exits on its own.
        std::thread::scope(|scope| -> Result<ExecResult> {
            let out = scope.spawn(|| read_pipe(stdout));
            let err = scope.spawn(|| read_pipe(stderr));
            let waited = wait_until(&mut child, deadline);
            if waited.is_err() {
                // Readers only finish once the pipes close.
                kill_tree(&mut child);
            }
            let stdout = out.join().unwrap_or_default();
            let stderr = err.join().unwrap_or_default();
            let (status, timed_out) = waited.with_context(|| format!("waiting for: {command}"))?;
            Ok(ExecResult {
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
                success: status.success() && !timed_out,
                code: status.code(),
                timed_out,
            })
        })
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Read a child pipe to the end; a missing or broken pipe yields what was read.
fn read_pipe(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).ok();
    }
    buf
}

/// Wait for `child`, killing its process group once `deadline` passes.
///
/// Returns the exit status and whether the deadline was hit.
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<(ExitStatus, bool)> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            kill_tree(child);
            return Ok((child.wait()?, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kill a timed-out child and every process in its group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Ok(pid) = i32::try_from(child.id()) {
            killpg(Pid::from_raw(pid), Signal::SIGKILL).ok();
        }
    }
    child.kill().ok();
}
