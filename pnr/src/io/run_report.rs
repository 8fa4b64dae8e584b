//! Persisted summary of a finished run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{ChunkStatus, ConditionSet};
use crate::reconcile::{LoopOutcome, LoopStop};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Complete,
    Stalled,
}

/// A chunk that could not start when the loop stalled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedChunk {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub domain: String,
    pub cpux: String,
    pub stop: StopReason,
    pub ticks: u32,
    pub duration_ms: u64,
    /// Final status per chunk, in declaration order.
    pub chunks: Vec<ChunkReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked: Vec<BlockedChunk>,
    /// Predicate store contents when the loop stopped.
    pub facts: ConditionSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkReport {
    pub name: String,
    pub status: ChunkStatus,
}

impl RunReport {
    pub fn from_outcome(domain: &str, outcome: &LoopOutcome, duration_ms: u64) -> Self {
        let (stop, blocked) = match &outcome.stop {
            LoopStop::Complete => (StopReason::Complete, Vec::new()),
            LoopStop::Stalled { blocked } => (
                StopReason::Stalled,
                blocked
                    .iter()
                    .map(|(name, unmet)| BlockedChunk {
                        name: name.clone(),
                        unmet: unmet.clone(),
                    })
                    .collect(),
            ),
        };
        Self {
            domain: domain.to_string(),
            cpux: outcome.cpux_id.clone(),
            stop,
            ticks: outcome.ticks,
            duration_ms,
            chunks: outcome
                .statuses
                .iter()
                .map(|(name, status)| ChunkReport {
                    name: name.clone(),
                    status: *status,
                })
                .collect(),
            blocked,
            facts: outcome.facts.clone(),
        }
    }

    /// Count of chunks per final status.
    pub fn status_counts(&self) -> BTreeMap<ChunkStatus, usize> {
        let mut counts = BTreeMap::new();
        for chunk in &self.chunks {
            *counts.entry(chunk.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Atomically write the report as pretty JSON (temp file + rename).
pub fn write_run_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut payload = serde_json::to_string_pretty(report).context("serialize run report")?;
    payload.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, payload)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

pub fn read_run_report(path: &Path) -> Result<RunReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}
