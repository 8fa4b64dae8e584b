//! Test-only helpers: domain builders, scripted backends and a recording daemon.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use tempfile::TempDir;

use crate::core::types::{ChunkStatus, Condition, ConditionSet, TruthValue};
use crate::domain::{ContainerSpec, Cpux, DesignChunk, Domain, Execution};
use crate::io::backend::{Backend, Completion, StartRequest};
use crate::io::container::{ContainerCreate, ContainerDaemon};

/// Build a condition set from `(prompt, tv)` pairs; the prompt doubles as the text.
pub fn conditions(pairs: &[(&str, TruthValue)]) -> ConditionSet {
    pairs
        .iter()
        .map(|(prompt, tv)| ((*prompt).to_string(), Condition::new(*prompt, *tv)))
        .collect()
}

/// A `ready` command chunk with no gatekeeper or flowout.
pub fn command_chunk(name: &str, command: &str) -> DesignChunk {
    chunk(name, Execution::Command(command.to_string()))
}

/// A `ready` container chunk with no gatekeeper or flowout.
pub fn container_chunk(name: &str, spec: ContainerSpec) -> DesignChunk {
    chunk(name, Execution::Container(spec))
}

fn chunk(name: &str, execution: Execution) -> DesignChunk {
    DesignChunk {
        name: name.to_string(),
        gatekeeper: ConditionSet::new(),
        flowin: ConditionSet::new(),
        flowout: ConditionSet::new(),
        status: ChunkStatus::Ready,
        execution,
    }
}

/// Domain named `test` with a single CPUX keyed by its id.
pub fn domain_with(cpux_id: &str, chunks: Vec<DesignChunk>) -> Domain {
    let mut cpuxs = BTreeMap::new();
    cpuxs.insert(
        cpux_id.to_string(),
        Cpux {
            id: cpux_id.to_string(),
            design_chunks: chunks,
            rt_state: ConditionSet::new(),
        },
    );
    Domain {
        name: "test".to_string(),
        cpuxs,
    }
}

/// Temporary working directory with `runtime/` and `config/` created.
pub struct TestWorkspace {
    temp: TempDir,
    pub status_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let status_dir = temp.path().join("runtime");
        let config_dir = temp.path().join("config");
        fs::create_dir_all(&status_dir)?;
        fs::create_dir_all(&config_dir)?;
        Ok(Self {
            temp,
            status_dir,
            config_dir,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Script {
    started: Vec<String>,
    prepared: usize,
    complete_with: Option<i32>,
    fail_on: Vec<String>,
}

/// Backend that records calls instead of running anything.
///
/// Clones share one log, so a test can keep a handle after moving the backend
/// into a dispatcher or reconciler.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    /// Starts succeed and never report completion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every start immediately reports a completion with `exit_code`.
    pub fn completing(exit_code: i32) -> Self {
        let backend = Self::new();
        lock(&backend.script).complete_with = Some(exit_code);
        backend
    }

    /// Fail the start of the named chunk.
    pub fn failing_on(self, chunk: &str) -> Self {
        lock(&self.script).fail_on.push(chunk.to_string());
        self
    }

    /// Names of started chunks, in start order.
    pub fn started(&self) -> Vec<String> {
        lock(&self.script).started.clone()
    }

    pub fn prepared(&self) -> usize {
        lock(&self.script).prepared
    }
}

impl Backend for ScriptedBackend {
    fn prepare(&mut self, _chunks: &[DesignChunk]) -> Result<()> {
        lock(&self.script).prepared += 1;
        Ok(())
    }

    fn start(&mut self, request: &StartRequest<'_>) -> Result<()> {
        let mut script = lock(&self.script);
        let name = &request.chunk.name;
        if script.fail_on.contains(name) {
            bail!("scripted start failure for '{name}'");
        }
        script.started.push(name.clone());
        if let Some(exit_code) = script.complete_with {
            // The receiver lives as long as the reconciler, which outlives this call.
            let _ = request.completions.send(Completion {
                chunk: request.index,
                name: name.clone(),
                exit_code: Some(exit_code),
            });
        }
        Ok(())
    }
}

/// One call observed by [`RecordingDaemon`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
    ListContainers,
    RemoveContainer(String),
    NetworkExists(String),
    RemoveNetwork(String),
    CreateNetwork(String),
    BuildImage { tag: String, context_bytes: usize },
    PullImage(String),
    CreateContainer(ContainerCreate),
    ConnectNetwork { network: String, container: String },
    StartContainer(String),
}

impl DaemonCall {
    /// Operation name, matching the [`ContainerDaemon`] method.
    pub fn op(&self) -> &'static str {
        match self {
            DaemonCall::ListContainers => "list_containers",
            DaemonCall::RemoveContainer(_) => "remove_container",
            DaemonCall::NetworkExists(_) => "network_exists",
            DaemonCall::RemoveNetwork(_) => "remove_network",
            DaemonCall::CreateNetwork(_) => "create_network",
            DaemonCall::BuildImage { .. } => "build_image",
            DaemonCall::PullImage(_) => "pull_image",
            DaemonCall::CreateContainer(_) => "create_container",
            DaemonCall::ConnectNetwork { .. } => "connect_network",
            DaemonCall::StartContainer(_) => "start_container",
        }
    }
}

#[derive(Debug, Default)]
struct DaemonState {
    calls: Vec<DaemonCall>,
    containers: Vec<String>,
    network: bool,
    fail: Vec<&'static str>,
}

/// In-memory [`ContainerDaemon`] that records every call.
///
/// Clones share state. Created containers get the id `id-<name>`.
#[derive(Debug, Clone, Default)]
pub struct RecordingDaemon {
    state: Arc<Mutex<DaemonState>>,
}

impl RecordingDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers that already exist before the run.
    pub fn with_containers(self, ids: &[&str]) -> Self {
        lock(&self.state)
            .containers
            .extend(ids.iter().map(|id| (*id).to_string()));
        self
    }

    /// The reserved network already exists.
    pub fn with_network(self) -> Self {
        lock(&self.state).network = true;
        self
    }

    /// Make every call of `op` (a [`DaemonCall::op`] name) fail.
    pub fn failing(self, op: &'static str) -> Self {
        lock(&self.state).fail.push(op);
        self
    }

    pub fn calls(&self) -> Vec<DaemonCall> {
        lock(&self.state).calls.clone()
    }

    /// Operation names of recorded calls, in order.
    pub fn ops(&self) -> Vec<&'static str> {
        lock(&self.state).calls.iter().map(DaemonCall::op).collect()
    }

    fn record(&self, call: DaemonCall) -> Result<MutexGuard<'_, DaemonState>> {
        let mut state = lock(&self.state);
        let op = call.op();
        state.calls.push(call);
        if state.fail.contains(&op) {
            bail!("scripted {op} failure");
        }
        Ok(state)
    }
}

impl ContainerDaemon for RecordingDaemon {
    fn list_containers(&mut self) -> Result<Vec<String>> {
        let state = self.record(DaemonCall::ListContainers)?;
        Ok(state.containers.clone())
    }

    fn remove_container(&mut self, id: &str) -> Result<()> {
        let mut state = self.record(DaemonCall::RemoveContainer(id.to_string()))?;
        state.containers.retain(|existing| existing != id);
        Ok(())
    }

    fn network_exists(&mut self, name: &str) -> Result<bool> {
        let state = self.record(DaemonCall::NetworkExists(name.to_string()))?;
        Ok(state.network)
    }

    fn remove_network(&mut self, name: &str) -> Result<()> {
        let mut state = self.record(DaemonCall::RemoveNetwork(name.to_string()))?;
        state.network = false;
        Ok(())
    }

    fn create_network(&mut self, name: &str) -> Result<()> {
        let mut state = self.record(DaemonCall::CreateNetwork(name.to_string()))?;
        state.network = true;
        Ok(())
    }

    fn build_image(&mut self, context: &[u8], tag: &str) -> Result<()> {
        self.record(DaemonCall::BuildImage {
            tag: tag.to_string(),
            context_bytes: context.len(),
        })?;
        Ok(())
    }

    fn pull_image(&mut self, reference: &str) -> Result<()> {
        self.record(DaemonCall::PullImage(reference.to_string()))?;
        Ok(())
    }

    fn create_container(&mut self, request: &ContainerCreate) -> Result<String> {
        let mut state = self.record(DaemonCall::CreateContainer(request.clone()))?;
        let id = format!("id-{}", request.name);
        state.containers.push(id.clone());
        Ok(id)
    }

    fn connect_network(&mut self, network: &str, container: &str) -> Result<()> {
        self.record(DaemonCall::ConnectNetwork {
            network: network.to_string(),
            container: container.to_string(),
        })?;
        Ok(())
    }

    fn start_container(&mut self, id: &str) -> Result<()> {
        self.record(DaemonCall::StartContainer(id.to_string()))?;
        Ok(())
    }
}
