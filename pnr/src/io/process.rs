//! Helpers for running short-lived child processes with timeouts and bounded output.
//!
//! Used for daemon client calls, which must finish before a backend `start`
//! returns. Long-running chunk commands go through
//! [`crate::io::process_backend`] instead and are never waited on here.

use std::io::{ErrorKind, Read, Write};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Fail unless the command exited zero within its timeout.
    pub fn ensure_success(&self, label: &str) -> Result<()> {
        if self.timed_out {
            return Err(anyhow!("{label} timed out"));
        }
        if !self.status.success() {
            return Err(anyhow!(
                "{label} failed with status {:?}: {}",
                self.status.code(),
                self.stderr_text()
            ));
        }
        Ok(())
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    // Feed stdin from its own thread; the child may exit or time out before
    // reading all of it.
    let stdin_handle = match stdin {
        Some(input) => {
            let child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || write_stdin(child_stdin, &input)))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) if status.success() && !timed_out => {
                return Err(err).context("write stdin");
            }
            Ok(Err(err)) => debug!(err = %err, "stdin write failed after child exited"),
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Write all of `input`, treating a closed pipe as the child having stopped reading.
fn write_stdin(mut child_stdin: ChildStdin, input: &[u8]) -> std::io::Result<()> {
    match child_stdin.write_all(input) {
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            debug!("child closed stdin early");
            Ok(())
        }
        other => other,
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_status() {
        let output =
            run_command_with_timeout(sh("echo hello"), None, Duration::from_secs(5), 1000)
                .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_text(), "hello");
        output.ensure_success("echo").expect("success");
    }

    #[test]
    fn pipes_stdin_through() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"context bytes"),
            Duration::from_secs(5),
            1000,
        )
        .expect("run");
        assert_eq!(output.stdout, b"context bytes");
    }

    #[test]
    fn early_exit_on_large_stdin_reports_child_stderr() {
        let context = vec![0u8; 4 * 1024 * 1024];
        let output = run_command_with_timeout(
            sh("echo 'Cannot connect to the Docker daemon' >&2; exit 1"),
            Some(&context),
            Duration::from_secs(5),
            1000,
        )
        .expect("run");

        assert_eq!(output.status.code(), Some(1));
        let err = output.ensure_success("docker build").unwrap_err();
        assert!(err.to_string().contains("Cannot connect to the Docker daemon"));
    }

    #[test]
    fn timeout_applies_while_stdin_is_unread() {
        let context = vec![0u8; 4 * 1024 * 1024];
        let output = run_command_with_timeout(
            sh("exec sleep 5"),
            Some(&context),
            Duration::from_millis(100),
            1000,
        )
        .expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output =
            run_command_with_timeout(sh("printf 0123456789"), None, Duration::from_secs(5), 4)
                .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let output =
            run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(100), 1000)
                .expect("run");
        assert!(output.timed_out);
        let err = output.ensure_success("sleep").unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn nonzero_exit_reports_stderr() {
        let output = run_command_with_timeout(
            sh("echo boom >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1000,
        )
        .expect("run");
        let err = output.ensure_success("boom").unwrap_err();
        assert!(err.to_string().contains("Some(3)"));
        assert!(err.to_string().contains("boom"));
    }
}
