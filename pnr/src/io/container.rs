//! Container backend: provision and start one container per chunk.
//!
//! Completion is never observed here. The container's own process writes its
//! conditions into the shared status directory (mounted at [`STATUS_MOUNT`])
//! and the loop picks them up through status ingestion.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::ConditionSet;
use crate::domain::{ContainerSpec, DesignChunk, Execution, VolumeEntry};
use crate::io::backend::{Backend, StartRequest, unsupported};
use crate::io::build_context::package_build_context;
use crate::io::ingest::write_status_file;

/// Network every container is attached to.
pub const NETWORK_NAME: &str = "pnr_network";
/// In-container path of the shared status directory.
pub const STATUS_MOUNT: &str = "/runtime";
/// In-container path of the shared configuration directory.
pub const CONFIG_MOUNT: &str = "/config";

/// Capability surface of the container daemon.
pub trait ContainerDaemon {
    /// Ids of all containers, running or not.
    fn list_containers(&mut self) -> Result<Vec<String>>;
    /// Force-remove a container.
    fn remove_container(&mut self, id: &str) -> Result<()>;
    fn network_exists(&mut self, name: &str) -> Result<bool>;
    fn remove_network(&mut self, name: &str) -> Result<()>;
    fn create_network(&mut self, name: &str) -> Result<()>;
    /// Build from a tar build context and tag the result.
    fn build_image(&mut self, context: &[u8], tag: &str) -> Result<()>;
    fn pull_image(&mut self, reference: &str) -> Result<()>;
    /// Create a container and return its id.
    fn create_container(&mut self, request: &ContainerCreate) -> Result<String>;
    fn connect_network(&mut self, network: &str, container: &str) -> Result<()>;
    fn start_container(&mut self, id: &str) -> Result<()>;
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCreate {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub ports: Vec<PortBinding>,
    pub mounts: Vec<Mount>,
}

/// Container port published on every host interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
    pub container_port: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// How the image for a chunk is obtained. Exactly one per start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Build { context_dir: PathBuf, tag: String },
    Pull { reference: String },
}

pub fn image_source(spec: &ContainerSpec) -> ImageSource {
    match &spec.build_path {
        Some(path) => ImageSource::Build {
            context_dir: PathBuf::from(path),
            tag: spec.image.clone(),
        },
        None => ImageSource::Pull {
            reference: spec.image.clone(),
        },
    }
}

/// Publish each `container[/proto] -> host` entry on `0.0.0.0`, defaulting to tcp.
pub fn port_bindings(spec: &ContainerSpec) -> Vec<PortBinding> {
    spec.ports
        .iter()
        .map(|(container, host)| {
            let (port, protocol) = container
                .split_once('/')
                .unwrap_or((container.as_str(), "tcp"));
            PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: host.clone(),
                container_port: port.to_string(),
                protocol: protocol.to_string(),
            }
        })
        .collect()
}

/// Parse a `source:target[:ro|rw]` volume entry.
///
/// Sources that look like paths become bind mounts (made absolute); bare names
/// are named volumes.
pub fn parse_volume(entry: &str) -> Result<Mount> {
    let volume = VolumeEntry::parse(entry).map_err(anyhow::Error::msg)?;
    let is_path = volume.source.starts_with('.') || volume.source.contains('/');
    let (kind, source) = if is_path {
        (MountKind::Bind, absolute(Path::new(volume.source))?)
    } else {
        (MountKind::Volume, volume.source.to_string())
    };
    Ok(Mount {
        kind,
        source,
        target: volume.target.to_string(),
        read_only: volume.read_only,
    })
}

fn absolute(path: &Path) -> Result<String> {
    let abs = std::path::absolute(path)
        .with_context(|| format!("resolve absolute path {}", path.display()))?;
    Ok(abs.display().to_string())
}

pub struct ContainerBackend<D> {
    daemon: D,
    status_dir: PathBuf,
    config_dir: PathBuf,
}

impl<D: ContainerDaemon> ContainerBackend<D> {
    pub fn new(daemon: D, status_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            daemon,
            status_dir: status_dir.into(),
            config_dir: config_dir.into(),
        }
    }

    /// Remove leftovers from earlier runs, then create the network fresh.
    ///
    /// Removal failures are warnings; failing to list or to create the network is fatal.
    #[instrument(skip_all)]
    pub fn reset(&mut self) -> Result<()> {
        let containers = self
            .daemon
            .list_containers()
            .context("list containers")?;
        for id in containers {
            match self.daemon.remove_container(&id) {
                Ok(()) => info!(container = %id, "removed stale container"),
                Err(err) => warn!(container = %id, err = %format!("{err:#}"), "failed to remove container"),
            }
        }

        if self
            .daemon
            .network_exists(NETWORK_NAME)
            .context("list networks")?
            && let Err(err) = self.daemon.remove_network(NETWORK_NAME)
        {
            warn!(network = NETWORK_NAME, err = %format!("{err:#}"), "failed to remove network");
        }

        self.daemon
            .create_network(NETWORK_NAME)
            .with_context(|| format!("create network {NETWORK_NAME}"))?;
        info!(network = NETWORK_NAME, "network ready");
        Ok(())
    }

    /// Obtain the image, create, attach and start the container. Returns its id.
    #[instrument(skip_all, fields(chunk = %chunk_name, container = %spec.name))]
    pub fn provision(&mut self, chunk_name: &str, spec: &ContainerSpec) -> Result<String> {
        match image_source(spec) {
            ImageSource::Build { context_dir, tag } => {
                info!(build_path = %context_dir.display(), %tag, "building image");
                let context = package_build_context(&context_dir)?;
                self.daemon
                    .build_image(&context, &tag)
                    .with_context(|| format!("build image {tag}"))?;
            }
            ImageSource::Pull { reference } => {
                info!(image = %reference, "pulling image");
                self.daemon
                    .pull_image(&reference)
                    .with_context(|| format!("pull image {reference}"))?;
            }
        }

        let request = self.create_request(spec)?;
        let id = self
            .daemon
            .create_container(&request)
            .with_context(|| format!("create container {}", spec.name))?;
        self.daemon
            .connect_network(NETWORK_NAME, &id)
            .with_context(|| format!("connect {} to {NETWORK_NAME}", spec.name))?;
        self.daemon
            .start_container(&id)
            .with_context(|| format!("start container {}", spec.name))?;
        info!(id = %id, "container started");

        if !spec.post_start.is_empty() {
            self.assert_post_start(&spec.name, &spec.post_start);
        }
        Ok(id)
    }

    fn create_request(&self, spec: &ContainerSpec) -> Result<ContainerCreate> {
        let mut mounts = vec![
            Mount {
                kind: MountKind::Bind,
                source: absolute(&self.status_dir)?,
                target: STATUS_MOUNT.to_string(),
                read_only: false,
            },
            Mount {
                kind: MountKind::Bind,
                source: absolute(&self.config_dir)?,
                target: CONFIG_MOUNT.to_string(),
                read_only: false,
            },
        ];
        for volume in &spec.volumes {
            mounts.push(parse_volume(volume)?);
        }
        Ok(ContainerCreate {
            name: spec.name.clone(),
            image: spec.image.clone(),
            env: spec.env.clone(),
            ports: port_bindings(spec),
            mounts,
        })
    }

    /// Write the chunk's declared post-start conditions as a status file; the
    /// next ingestion pass merges them.
    fn assert_post_start(&self, container: &str, facts: &ConditionSet) {
        let path = post_start_path(&self.status_dir, container);
        match write_status_file(&path, facts) {
            Ok(()) => info!(file = %path.display(), count = facts.len(), "post-start conditions written"),
            Err(err) => warn!(file = %path.display(), err = %format!("{err:#}"), "failed to write post-start conditions"),
        }
    }
}

/// `<status_dir>/<container>.post_start.json`
pub fn post_start_path(status_dir: &Path, container: &str) -> PathBuf {
    status_dir.join(format!("{container}.post_start.json"))
}

impl<D: ContainerDaemon> Backend for ContainerBackend<D> {
    fn prepare(&mut self, _chunks: &[DesignChunk]) -> Result<()> {
        self.reset()
    }

    fn start(&mut self, request: &StartRequest<'_>) -> Result<()> {
        let Execution::Container(spec) = &request.chunk.execution else {
            return unsupported("container", request.chunk);
        };
        self.provision(&request.chunk.name, spec)?;
        Ok(())
    }
}
