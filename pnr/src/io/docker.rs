//! [`ContainerDaemon`] implementation that shells out to the `docker` CLI.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::io::config::ContainerConfig;
use crate::io::container::{ContainerCreate, ContainerDaemon, MountKind};
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub struct DockerCli {
    bin: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl DockerCli {
    pub fn new(config: &ContainerConfig) -> Self {
        Self {
            bin: config.docker_bin.clone(),
            timeout: config.command_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let label = format!("{} {}", self.bin, args.first().map_or("", String::as_str));
        debug!(bin = %self.bin, ?args, "docker call");
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        let output = run_command_with_timeout(cmd, stdin, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {label}"))?;
        output.ensure_success(&label)?;
        Ok(output)
    }

    fn run_args(&self, args: &[&str]) -> Result<CommandOutput> {
        let owned: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
        self.run(&owned, None)
    }
}

impl ContainerDaemon for DockerCli {
    fn list_containers(&mut self) -> Result<Vec<String>> {
        let output = self.run_args(&["ps", "--all", "--quiet", "--no-trunc"])?;
        Ok(lines(&output.stdout_text()))
    }

    fn remove_container(&mut self, id: &str) -> Result<()> {
        self.run_args(&["rm", "--force", id])?;
        Ok(())
    }

    fn network_exists(&mut self, name: &str) -> Result<bool> {
        let output = self.run_args(&["network", "ls", "--format", "{{.Name}}"])?;
        Ok(lines(&output.stdout_text()).iter().any(|n| n == name))
    }

    fn remove_network(&mut self, name: &str) -> Result<()> {
        self.run_args(&["network", "rm", name])?;
        Ok(())
    }

    fn create_network(&mut self, name: &str) -> Result<()> {
        self.run_args(&["network", "create", name])?;
        Ok(())
    }

    fn build_image(&mut self, context: &[u8], tag: &str) -> Result<()> {
        // `-` reads the build context as a tar stream from stdin.
        let args = vec![
            "build".to_string(),
            "--tag".to_string(),
            tag.to_string(),
            "-".to_string(),
        ];
        self.run(&args, Some(context))?;
        Ok(())
    }

    fn pull_image(&mut self, reference: &str) -> Result<()> {
        self.run_args(&["pull", reference])?;
        Ok(())
    }

    fn create_container(&mut self, request: &ContainerCreate) -> Result<String> {
        let output = self.run(&create_args(request), None)?;
        let id = output.stdout_text();
        if id.is_empty() {
            bail!("docker create printed no container id for {}", request.name);
        }
        Ok(id)
    }

    fn connect_network(&mut self, network: &str, container: &str) -> Result<()> {
        self.run_args(&["network", "connect", network, container])?;
        Ok(())
    }

    fn start_container(&mut self, id: &str) -> Result<()> {
        self.run_args(&["start", id])?;
        Ok(())
    }
}

/// Arguments for `docker create` (the image comes last).
pub fn create_args(request: &ContainerCreate) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        request.name.clone(),
    ];
    for entry in &request.env {
        args.push("--env".to_string());
        args.push(entry.clone());
    }
    for port in &request.ports {
        args.push("--publish".to_string());
        args.push(format!(
            "{}:{}:{}/{}",
            port.host_ip, port.host_port, port.container_port, port.protocol
        ));
    }
    for mount in &request.mounts {
        let kind = match mount.kind {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
        };
        let mut spec = format!(
            "type={kind},source={},target={}",
            mount.source, mount.target
        );
        if mount.read_only {
            spec.push_str(",readonly");
        }
        args.push("--mount".to_string());
        args.push(spec);
    }
    args.push(request.image.clone());
    args
}

fn lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
