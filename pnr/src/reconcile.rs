//! The reconciliation loop for one CPUX.
//!
//! Each tick refreshes the predicate store from status files, then visits every
//! chunk in declaration order and advances its state machine:
//!
//! - `ready`: start it through the backend once its gatekeeper holds.
//! - `executing`: mark it completed once its flowout holds.
//! - `completed`: skip.
//!
//! Background completions from the process backend arrive on a channel and are
//! applied on this thread before each chunk visit, so a completion reported
//! early in a tick is visible to chunks visited later in the same tick. This
//! thread is the only one that changes chunk statuses.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{Level, debug, enabled, info, instrument, warn};

use crate::core::evaluator::{check_conditions, satisfies_completion, satisfies_gatekeeper};
use crate::core::transitions::advance;
use crate::core::types::{ChunkStatus, ConditionSet};
use crate::core::verdict::{TickTally, Verdict};
use crate::domain::{Cpux, DesignChunk};
use crate::io::backend::{Backend, Completion, StartRequest};
use crate::io::ingest::ingest_status_dir;
use crate::store::PredicateStore;

/// Loop settings, independent of any backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub tick_interval: Duration,
    /// Abort after this many ticks; `None` runs until complete or stalled.
    pub max_iterations: Option<u32>,
    pub status_dir: PathBuf,
}

/// Returned (inside `anyhow::Error`) when the iteration cap is reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reconciliation did not finish within {max_iterations} ticks")]
pub struct MaxIterationsExceeded {
    pub max_iterations: u32,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every chunk completed.
    Complete,
    /// No chunk could make progress. Lists each chunk still `ready` with the
    /// first gatekeeper prompt it is waiting on.
    Stalled {
        blocked: Vec<(String, Option<String>)>,
    },
}

/// Summary of a finished loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cpux_id: String,
    pub ticks: u32,
    pub stop: LoopStop,
    /// Final status per chunk, in declaration order.
    pub statuses: Vec<(String, ChunkStatus)>,
    pub facts: ConditionSet,
}

pub struct Reconciler<B> {
    cpux_id: String,
    chunks: Vec<DesignChunk>,
    statuses: Vec<ChunkStatus>,
    store: PredicateStore,
    backend: B,
    config: ReconcileConfig,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    ticks: u32,
}

impl<B: Backend> Reconciler<B> {
    /// Build a loop over `cpux`, seeding `store` with its initial runtime state.
    pub fn new(cpux: &Cpux, store: PredicateStore, backend: B, config: ReconcileConfig) -> Self {
        store.merge_all(&cpux.rt_state);
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            cpux_id: cpux.id.clone(),
            statuses: cpux.design_chunks.iter().map(|chunk| chunk.status).collect(),
            chunks: cpux.design_chunks.clone(),
            store,
            backend,
            config,
            completions_tx,
            completions_rx,
            ticks: 0,
        }
    }

    pub fn store(&self) -> &PredicateStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Current status of every chunk, in declaration order.
    pub fn statuses(&self) -> Vec<(String, ChunkStatus)> {
        self.chunks
            .iter()
            .zip(&self.statuses)
            .map(|(chunk, status)| (chunk.name.clone(), *status))
            .collect()
    }

    pub fn status_of(&self, name: &str) -> Option<ChunkStatus> {
        self.chunks
            .iter()
            .position(|chunk| chunk.name == name)
            .map(|index| self.statuses[index])
    }

    /// Prepare the backend, then tick until complete, stalled, or the cap is hit.
    ///
    /// A backend failure aborts the run; chunks already started keep running.
    #[instrument(skip_all, fields(cpux = %self.cpux_id))]
    pub fn run(&mut self) -> Result<LoopOutcome> {
        self.backend
            .prepare(&self.chunks)
            .context("prepare execution backends")?;
        info!(chunks = self.chunks.len(), "reconciliation started");

        loop {
            if let Some(max_iterations) = self.config.max_iterations
                && self.ticks >= max_iterations
            {
                warn!(max_iterations, "iteration cap reached");
                return Err(MaxIterationsExceeded { max_iterations }.into());
            }

            match self.tick()? {
                Verdict::Complete => {
                    info!(ticks = self.ticks, "all chunks completed");
                    return Ok(self.outcome(LoopStop::Complete));
                }
                Verdict::Stalled => {
                    let blocked = self.blocked();
                    for (chunk, unmet) in &blocked {
                        warn!(%chunk, unmet = unmet.as_deref().unwrap_or("-"), "chunk blocked");
                    }
                    warn!(ticks = self.ticks, "no chunk can make progress, stopping");
                    return Ok(self.outcome(LoopStop::Stalled { blocked }));
                }
                Verdict::Continue => thread::sleep(self.config.tick_interval),
            }
        }
    }

    /// Run one tick and return the terminal decision.
    pub fn tick(&mut self) -> Result<Verdict> {
        self.ticks += 1;
        let ingest = ingest_status_dir(&self.config.status_dir, &self.store)?;
        debug!(
            tick = self.ticks,
            merged = ingest.merged.len(),
            skipped = ingest.skipped.len(),
            changed = ingest.changed,
            "status files ingested"
        );
        if enabled!(Level::DEBUG) {
            let facts = self.store.read(describe_facts);
            debug!(tick = self.ticks, %facts, "predicate store");
        }

        let mut tally = TickTally::new();
        for index in 0..self.chunks.len() {
            for _ in 0..self.drain_completions()? {
                tally.record_completion();
            }
            let visited = self.statuses[index];
            let after = self.visit(index)?;
            tally.record(visited, after);
        }
        Ok(tally.verdict())
    }

    fn visit(&mut self, index: usize) -> Result<ChunkStatus> {
        let chunk = &self.chunks[index];
        let status = &mut self.statuses[index];
        match *status {
            ChunkStatus::Completed => {}
            ChunkStatus::Executing => {
                if self.store.read(|facts| satisfies_completion(chunk, facts)) {
                    advance(&chunk.name, status, ChunkStatus::Completed)?;
                    info!(chunk = %chunk.name, "chunk completed");
                }
            }
            ChunkStatus::Ready => {
                if self.store.read(|facts| satisfies_gatekeeper(chunk, facts)) {
                    info!(chunk = %chunk.name, kind = chunk.execution.kind(), "gatekeeper satisfied, starting");
                    self.backend
                        .start(&StartRequest {
                            index,
                            chunk,
                            completions: &self.completions_tx,
                        })
                        .with_context(|| format!("start chunk '{}'", chunk.name))?;
                    advance(&chunk.name, status, ChunkStatus::Executing)?;
                }
            }
        }
        Ok(*status)
    }

    /// Apply every completion received so far; returns how many were applied.
    fn drain_completions(&mut self) -> Result<usize> {
        let mut applied = 0;
        loop {
            match self.completions_rx.try_recv() {
                Ok(done) => {
                    self.apply_completion(done)?;
                    applied += 1;
                }
                // The loop owns a sender, so the channel never disconnects.
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(applied),
            }
        }
    }

    fn apply_completion(&mut self, done: Completion) -> Result<()> {
        let Some(chunk) = self.chunks.get(done.chunk) else {
            warn!(index = done.chunk, name = %done.name, "completion for unknown chunk");
            return Ok(());
        };
        match done.exit_code {
            Some(0) => {}
            Some(code) => warn!(chunk = %chunk.name, exit_code = code, "chunk command exited with non-zero status"),
            None => warn!(chunk = %chunk.name, "chunk command ended without an exit code"),
        }

        let changed = self.store.merge_all(&chunk.flowout);
        let status = &mut self.statuses[done.chunk];
        if *status == ChunkStatus::Executing {
            advance(&chunk.name, status, ChunkStatus::Completed)?;
            info!(chunk = %chunk.name, flowout = changed, "chunk finished");
        } else {
            debug!(chunk = %chunk.name, %status, "completion for chunk that already left executing");
        }
        Ok(())
    }

    fn blocked(&self) -> Vec<(String, Option<String>)> {
        let facts = self.store.snapshot();
        self.chunks
            .iter()
            .zip(&self.statuses)
            .filter(|(_, status)| **status == ChunkStatus::Ready)
            .map(|(chunk, _)| {
                let unmet = check_conditions(&chunk.gatekeeper, &facts)
                    .err()
                    .map(|unmet| unmet.prompt().to_string());
                (chunk.name.clone(), unmet)
            })
            .collect()
    }

    fn outcome(&self, stop: LoopStop) -> LoopOutcome {
        LoopOutcome {
            cpux_id: self.cpux_id.clone(),
            ticks: self.ticks,
            stop,
            statuses: self.statuses(),
            facts: self.store.snapshot(),
        }
    }
}

/// `prompt=tv` pairs, space separated.
fn describe_facts(facts: &ConditionSet) -> String {
    facts
        .iter()
        .map(|(prompt, condition)| format!("{prompt}={}", condition.tv))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Condition, TruthValue};
    use crate::io::ingest::write_status_file;
    use crate::test_support::{ScriptedBackend, command_chunk, conditions};

    fn config(status_dir: PathBuf, max_iterations: Option<u32>) -> ReconcileConfig {
        ReconcileConfig {
            tick_interval: Duration::from_millis(1),
            max_iterations,
            status_dir,
        }
    }

    fn cpux(chunks: Vec<DesignChunk>) -> Cpux {
        Cpux {
            id: "stack".to_string(),
            design_chunks: chunks,
            rt_state: ConditionSet::new(),
        }
    }

    fn chunk(name: &str, gate: &[&str], flowout: &[&str]) -> DesignChunk {
        let mut chunk = command_chunk(name, "true");
        chunk.gatekeeper = conditions(
            &gate
                .iter()
                .map(|prompt| (*prompt, TruthValue::Yes))
                .collect::<Vec<_>>(),
        );
        chunk.flowout = conditions(
            &flowout
                .iter()
                .map(|prompt| (*prompt, TruthValue::Yes))
                .collect::<Vec<_>>(),
        );
        chunk
    }

    #[test]
    fn completion_propagates_within_the_same_tick() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![
            chunk("a", &[], &["a_done"]),
            chunk("b", &["a_done"], &["b_done"]),
        ]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::completing(0),
            config(temp.path().to_path_buf(), None),
        );

        assert_eq!(rec.tick().expect("tick 1"), Verdict::Continue);
        assert_eq!(rec.status_of("a"), Some(ChunkStatus::Completed));
        assert_eq!(rec.status_of("b"), Some(ChunkStatus::Executing));

        assert_eq!(rec.tick().expect("tick 2"), Verdict::Complete);
        assert_eq!(rec.store().get("b_done").map(|c| c.tv), Some(TruthValue::Yes));
        assert_eq!(rec.backend().started(), vec!["a", "b"]);
    }

    #[test]
    fn completion_arriving_after_visit_is_seen_next_tick() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![
            chunk("b", &["a_done"], &[]),
            chunk("a", &[], &["a_done"]),
        ]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::completing(0),
            config(temp.path().to_path_buf(), None),
        );

        assert_eq!(rec.tick().expect("tick 1"), Verdict::Continue);
        assert_eq!(rec.status_of("b"), Some(ChunkStatus::Ready));
        assert_eq!(rec.status_of("a"), Some(ChunkStatus::Executing));

        rec.tick().expect("tick 2");
        assert_eq!(rec.status_of("a"), Some(ChunkStatus::Completed));
        assert_eq!(rec.status_of("b"), Some(ChunkStatus::Executing));
    }

    #[test]
    fn unmet_gatekeeper_stalls_with_blocking_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![chunk("api", &["svc_ready"], &[])]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::new(),
            config(temp.path().to_path_buf(), Some(5)),
        );

        let outcome = rec.run().expect("run");
        assert_eq!(outcome.ticks, 1);
        assert_eq!(
            outcome.stop,
            LoopStop::Stalled {
                blocked: vec![("api".to_string(), Some("svc_ready".to_string()))],
            }
        );
        assert_eq!(outcome.statuses, vec![("api".to_string(), ChunkStatus::Ready)]);
        assert!(rec.backend().started().is_empty());
    }

    #[test]
    fn status_file_completes_executing_chunk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![chunk("db", &[], &["db_ready"])]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::new(),
            config(temp.path().to_path_buf(), None),
        );

        assert_eq!(rec.tick().expect("tick 1"), Verdict::Continue);
        assert_eq!(rec.tick().expect("tick 2"), Verdict::Continue);
        assert_eq!(rec.status_of("db"), Some(ChunkStatus::Executing));

        write_status_file(
            &temp.path().join("db.json"),
            &conditions(&[("db_ready", TruthValue::Yes)]),
        )
        .expect("write status");
        assert_eq!(rec.tick().expect("tick 3"), Verdict::Continue);
        assert_eq!(rec.status_of("db"), Some(ChunkStatus::Completed));
        assert_eq!(rec.tick().expect("tick 4"), Verdict::Complete);
    }

    #[test]
    fn late_completion_for_completed_chunk_is_harmless() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![chunk("seed", &[], &["seeded"])]);
        let store = PredicateStore::new();
        store.set("seeded", Condition::new("seeded", TruthValue::Yes));
        let mut rec = Reconciler::new(
            &cpux,
            store,
            ScriptedBackend::new(),
            config(temp.path().to_path_buf(), None),
        );

        rec.tick().expect("tick 1");
        rec.tick().expect("tick 2");
        assert_eq!(rec.status_of("seed"), Some(ChunkStatus::Completed));

        rec.completions_tx
            .send(Completion {
                chunk: 0,
                name: "seed".to_string(),
                exit_code: Some(1),
            })
            .expect("send");
        rec.tick().expect("tick 3");
        assert_eq!(rec.status_of("seed"), Some(ChunkStatus::Completed));
    }

    #[test]
    fn iteration_cap_aborts_with_typed_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![chunk("forever", &[], &["never"])]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::new(),
            config(temp.path().to_path_buf(), Some(3)),
        );

        let err = rec.run().unwrap_err();
        assert_eq!(
            err.downcast_ref::<MaxIterationsExceeded>(),
            Some(&MaxIterationsExceeded { max_iterations: 3 })
        );
        assert_eq!(rec.ticks(), 3);
    }

    #[test]
    fn start_failure_aborts_and_leaves_chunk_ready() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![chunk("broken", &[], &[])]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::new().failing_on("broken"),
            config(temp.path().to_path_buf(), None),
        );

        let err = rec.run().unwrap_err();
        assert!(format!("{err:#}").contains("start chunk 'broken'"));
        assert_eq!(rec.status_of("broken"), Some(ChunkStatus::Ready));
        assert_eq!(rec.backend().prepared(), 1);
    }

    #[test]
    fn runtime_state_seeds_the_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cpux = cpux(vec![chunk("api", &["system_ready"], &[])]);
        cpux.rt_state = conditions(&[("system_ready", TruthValue::Yes)]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::completing(0),
            config(temp.path().to_path_buf(), None),
        );

        let outcome = rec.run().expect("run");
        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.ticks, 2);
    }

    #[test]
    fn missing_status_dir_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cpux = cpux(vec![chunk("a", &[], &[])]);
        let mut rec = Reconciler::new(
            &cpux,
            PredicateStore::new(),
            ScriptedBackend::new(),
            config(temp.path().join("absent"), None),
        );
        let err = rec.tick().unwrap_err();
        assert!(format!("{err:#}").contains("read status dir"));
    }

    #[test]
    fn describe_facts_lists_prompt_and_truth_value() {
        let facts = conditions(&[("a", TruthValue::Yes), ("b", TruthValue::Unknown)]);
        assert_eq!(describe_facts(&facts), "a=Y b=U");
    }
}
