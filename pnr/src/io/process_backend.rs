//! Process backend: run a chunk's shell command as a detached child.
//!
//! `start` spawns the command and returns. A waiter thread blocks on the child
//! and reports a [`Completion`] to the loop thread, which then asserts the
//! chunk's flowout and marks it completed. The exit status is reported but
//! does not change that outcome.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::Execution;
use crate::io::backend::{Backend, Completion, StartRequest, unsupported};
use crate::io::config::ProcessConfig;

pub struct ProcessBackend {
    shell: String,
    log_dir: Option<PathBuf>,
}

impl ProcessBackend {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            log_dir: config.log_dir.clone(),
        }
    }

    fn command(&self, script: &str, chunk_name: &str) -> Result<Command> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(script).stdin(Stdio::null());
        match &self.log_dir {
            Some(dir) => {
                let path = chunk_log_path(dir, chunk_name);
                fs::create_dir_all(dir)
                    .with_context(|| format!("create chunk log dir {}", dir.display()))?;
                let stdout = File::create(&path)
                    .with_context(|| format!("create chunk log {}", path.display()))?;
                let stderr = stdout
                    .try_clone()
                    .with_context(|| format!("clone chunk log {}", path.display()))?;
                cmd.stdout(stdout).stderr(stderr);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(cmd)
    }
}

impl Backend for ProcessBackend {
    #[instrument(skip_all, fields(chunk = %request.chunk.name))]
    fn start(&mut self, request: &StartRequest<'_>) -> Result<()> {
        let Execution::Command(script) = &request.chunk.execution else {
            return unsupported("process", request.chunk);
        };

        let mut cmd = self.command(script, &request.chunk.name)?;
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, shell = %self.shell, "failed to spawn chunk command");
                return Err(err)
                    .with_context(|| format!("spawn command for chunk '{}'", request.chunk.name));
            }
        };
        info!(pid = child.id(), "chunk command spawned");

        let completions = request.completions.clone();
        let index = request.index;
        let name = request.chunk.name.clone();
        thread::Builder::new()
            .name(format!("chunk-{name}"))
            .spawn(move || {
                let exit_code = match child.wait() {
                    Ok(status) => status.code(),
                    Err(err) => {
                        warn!(chunk = %name, err = %err, "failed to wait on chunk command");
                        None
                    }
                };
                debug!(chunk = %name, ?exit_code, "chunk command finished");
                let done = Completion {
                    chunk: index,
                    name,
                    exit_code,
                };
                if completions.send(done).is_err() {
                    debug!("reconciliation loop already finished");
                }
            })
            .with_context(|| format!("spawn waiter thread for chunk '{}'", request.chunk.name))?;
        Ok(())
    }
}

/// `<log_dir>/<chunk>.log`, with characters unsafe in file names replaced.
pub fn chunk_log_path(dir: &Path, chunk_name: &str) -> PathBuf {
    let safe: String = chunk_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{safe}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContainerSpec;
    use crate::test_support::{command_chunk, container_chunk};
    use std::sync::mpsc;
    use std::time::Duration;

    fn backend(log_dir: Option<PathBuf>) -> ProcessBackend {
        ProcessBackend::new(&ProcessConfig {
            shell: "sh".to_string(),
            log_dir,
        })
    }

    #[test]
    fn reports_completion_with_exit_code() {
        let (tx, rx) = mpsc::channel();
        let chunk = command_chunk("fails", "exit 7");
        backend(None)
            .start(&StartRequest {
                index: 4,
                chunk: &chunk,
                completions: &tx,
            })
            .expect("start");

        let done = rx.recv_timeout(Duration::from_secs(5)).expect("completion");
        assert_eq!(
            done,
            Completion {
                chunk: 4,
                name: "fails".to_string(),
                exit_code: Some(7),
            }
        );
    }

    #[test]
    fn start_returns_before_command_finishes() {
        let (tx, rx) = mpsc::channel();
        let chunk = command_chunk("slow", "sleep 2");
        backend(None)
            .start(&StartRequest {
                index: 0,
                chunk: &chunk,
                completions: &tx,
            })
            .expect("start");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn writes_output_to_chunk_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_dir = temp.path().join("logs");
        let (tx, rx) = mpsc::channel();
        let chunk = command_chunk("api/server", "echo out; echo err >&2");
        backend(Some(log_dir.clone()))
            .start(&StartRequest {
                index: 0,
                chunk: &chunk,
                completions: &tx,
            })
            .expect("start");
        rx.recv_timeout(Duration::from_secs(5)).expect("completion");

        let log = fs::read_to_string(log_dir.join("api_server.log")).expect("read log");
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let (tx, _rx) = mpsc::channel();
        let chunk = command_chunk("x", "true");
        let mut backend = ProcessBackend::new(&ProcessConfig {
            shell: "/definitely/not/a/shell".to_string(),
            log_dir: None,
        });
        let err = backend
            .start(&StartRequest {
                index: 0,
                chunk: &chunk,
                completions: &tx,
            })
            .unwrap_err();
        assert!(err.to_string().contains("spawn command for chunk 'x'"));
    }

    #[test]
    fn rejects_container_chunks() {
        let (tx, _rx) = mpsc::channel();
        let chunk = container_chunk("db", ContainerSpec::default());
        let err = backend(None)
            .start(&StartRequest {
                index: 0,
                chunk: &chunk,
                completions: &tx,
            })
            .unwrap_err();
        assert!(err.to_string().contains("process backend cannot start"));
    }
}
