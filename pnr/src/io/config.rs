//! Runner settings, usually stored in `pnr.toml` next to the domain config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner settings (TOML).
///
/// Missing fields default to the values the loop was tuned with: a one second
/// tick and a thirty tick cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Sleep between ticks.
    pub tick_interval_ms: u64,

    /// Abort the run after this many ticks. `0` disables the cap.
    pub max_iterations: u32,

    /// Directory polled for status files every tick.
    pub status_dir: PathBuf,

    /// Shared configuration directory mounted into containers.
    pub config_dir: PathBuf,

    pub process: ProcessConfig,

    pub container: ContainerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Shell used as `<shell> -c <command>`.
    pub shell: String,
    /// When set, each chunk's stdout/stderr goes to `<log_dir>/<chunk>.log`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container daemon client binary.
    pub docker_bin: String,
    /// Upper bound for a single daemon call (image builds included).
    pub command_timeout_secs: u64,
    /// Keep at most this many bytes of daemon client stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_iterations: 30,
            status_dir: PathBuf::from("runtime"),
            config_dir: PathBuf::from("config"),
            process: ProcessConfig::default(),
            container: ContainerConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("tick_interval_ms must be > 0"));
        }
        if self.status_dir.as_os_str().is_empty() {
            return Err(anyhow!("status_dir must be non-empty"));
        }
        if self.config_dir.as_os_str().is_empty() {
            return Err(anyhow!("config_dir must be non-empty"));
        }
        if self.process.shell.trim().is_empty() {
            return Err(anyhow!("process.shell must be non-empty"));
        }
        if self.container.docker_bin.trim().is_empty() {
            return Err(anyhow!("container.docker_bin must be non-empty"));
        }
        if self.container.command_timeout_secs == 0 {
            return Err(anyhow!("container.command_timeout_secs must be > 0"));
        }
        if self.container.output_limit_bytes == 0 {
            return Err(anyhow!("container.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// The iteration cap, or `None` when disabled.
    pub fn iteration_cap(&self) -> Option<u32> {
        (self.max_iterations > 0).then_some(self.max_iterations)
    }
}

impl ContainerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid settings {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
