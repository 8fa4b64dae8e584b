//! Backend abstraction for starting design chunks.
//!
//! The [`Backend`] trait decouples the reconciliation loop from how a chunk is
//! actually run. `start` never waits for the chunk to finish: process chunks
//! are waited on by a background thread, and container chunks report through
//! status ingestion. Container provisioning (image build or pull, create,
//! network attach, start) does run on the loop thread, bounded by the daemon
//! call timeout. Tests use scripted backends that record calls.

use std::sync::mpsc::Sender;

use anyhow::{Result, bail};

use crate::domain::{DesignChunk, Execution};

/// Message sent back to the loop thread when a background chunk finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Index of the chunk in declaration order.
    pub chunk: usize,
    pub name: String,
    /// Exit code, or `None` if the process was killed by a signal or could not be waited on.
    pub exit_code: Option<i32>,
}

/// Parameters for a backend start.
#[derive(Debug)]
pub struct StartRequest<'a> {
    /// Index of the chunk in declaration order.
    pub index: usize,
    pub chunk: &'a DesignChunk,
    /// Where background completions are reported.
    pub completions: &'a Sender<Completion>,
}

pub trait Backend {
    /// Called once before the first tick with every chunk of the CPUX.
    fn prepare(&mut self, _chunks: &[DesignChunk]) -> Result<()> {
        Ok(())
    }

    /// Start the chunk without waiting for it to complete.
    ///
    /// Setup work needed to launch the chunk may run synchronously; the loop
    /// thread is blocked until it returns.
    fn start(&mut self, request: &StartRequest<'_>) -> Result<()>;
}

/// Routes each chunk to the backend matching its execution descriptor.
pub struct Dispatcher<P, C> {
    process: P,
    container: C,
}

impl<P: Backend, C: Backend> Dispatcher<P, C> {
    pub fn new(process: P, container: C) -> Self {
        Self { process, container }
    }
}

impl<P: Backend, C: Backend> Backend for Dispatcher<P, C> {
    fn prepare(&mut self, chunks: &[DesignChunk]) -> Result<()> {
        if chunks
            .iter()
            .any(|chunk| matches!(chunk.execution, Execution::Command(_)))
        {
            self.process.prepare(chunks)?;
        }
        // Only touch the container daemon when some chunk actually needs it.
        if chunks
            .iter()
            .any(|chunk| matches!(chunk.execution, Execution::Container(_)))
        {
            self.container.prepare(chunks)?;
        }
        Ok(())
    }

    fn start(&mut self, request: &StartRequest<'_>) -> Result<()> {
        match request.chunk.execution {
            Execution::Command(_) => self.process.start(request),
            Execution::Container(_) => self.container.start(request),
        }
    }
}

/// Error for a backend handed a chunk of the wrong kind.
pub fn unsupported(backend: &str, chunk: &DesignChunk) -> Result<()> {
    bail!(
        "{backend} backend cannot start {} chunk '{}'",
        chunk.execution.kind(),
        chunk.name
    )
}
