use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{ChunkStatus, ConditionSet};

/// Root of a loaded configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub cpuxs: BTreeMap<String, Cpux>,
}

/// An ordered chunk sequence sharing one runtime state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cpux {
    pub id: String,
    pub design_chunks: Vec<DesignChunk>,
    /// Initial runtime state, seeded into the predicate store before the first tick.
    #[serde(default)]
    pub rt_state: ConditionSet,
}

/// One schedulable step.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawChunk", into = "RawChunk")]
pub struct DesignChunk {
    pub name: String,
    pub gatekeeper: ConditionSet,
    /// Inputs the chunk consumes. Documentation only, never gated on.
    pub flowin: ConditionSet,
    pub flowout: ConditionSet,
    pub status: ChunkStatus,
    pub execution: Execution,
}

/// How a chunk is executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Execution {
    /// Shell command run by the process backend.
    Command(String),
    /// Container provisioned by the container backend.
    Container(ContainerSpec),
}

impl Execution {
    pub fn kind(&self) -> &'static str {
        match self {
            Execution::Command(_) => "command",
            Execution::Container(_) => "container",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_path: Option<String>,
    /// Container port (optionally `port/proto`) to host port.
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    /// Extra mounts in `source:target[:ro|rw]` form.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Conditions the backend asserts as soon as the container has started.
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub post_start: ConditionSet,
}

/// A volume entry split into its parts, with no path resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeEntry<'a> {
    pub source: &'a str,
    pub target: &'a str,
    pub read_only: bool,
}

impl<'a> VolumeEntry<'a> {
    /// Split `source:target[:ro|rw]`. Both parts must be non-empty.
    pub fn parse(entry: &'a str) -> Result<Self, String> {
        let parts: Vec<&str> = entry.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [source, target] => (*source, *target, None),
            [source, target, mode] => (*source, *target, Some(*mode)),
            _ => return Err(format!("volume '{entry}' must be source:target[:ro|rw]")),
        };
        if source.is_empty() || target.is_empty() {
            return Err(format!("volume '{entry}' must be source:target[:ro|rw]"));
        }
        let read_only = match mode {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(other) => return Err(format!("volume '{entry}' has unknown mode '{other}'")),
        };
        Ok(Self {
            source,
            target,
            read_only,
        })
    }
}

/// Wire form of a chunk: `command` and `container` are both optional here and
/// exactly one must be present.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawChunk {
    name: String,
    #[serde(default)]
    gatekeeper: ConditionSet,
    #[serde(default)]
    flowin: ConditionSet,
    #[serde(default)]
    flowout: ConditionSet,
    #[serde(default)]
    status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<ContainerSpec>,
}

impl TryFrom<RawChunk> for DesignChunk {
    type Error = String;

    fn try_from(raw: RawChunk) -> Result<Self, Self::Error> {
        let execution = match (raw.command, raw.container) {
            (Some(command), None) => Execution::Command(command),
            (None, Some(container)) => Execution::Container(container),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "chunk '{}' sets both command and container",
                    raw.name
                ));
            }
            (None, None) => {
                return Err(format!(
                    "chunk '{}' needs either a command or a container",
                    raw.name
                ));
            }
        };
        Ok(DesignChunk {
            name: raw.name,
            gatekeeper: raw.gatekeeper,
            flowin: raw.flowin,
            flowout: raw.flowout,
            status: raw.status,
            execution,
        })
    }
}

impl From<DesignChunk> for RawChunk {
    fn from(chunk: DesignChunk) -> Self {
        let (command, container) = match chunk.execution {
            Execution::Command(command) => (Some(command), None),
            Execution::Container(container) => (None, Some(container)),
        };
        RawChunk {
            name: chunk.name,
            gatekeeper: chunk.gatekeeper,
            flowin: chunk.flowin,
            flowout: chunk.flowout,
            status: chunk.status,
            command,
            container,
        }
    }
}
