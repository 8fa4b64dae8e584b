//! Terminal decision at the end of each tick.

use crate::core::types::ChunkStatus;

/// What the loop does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every chunk is completed.
    Complete,
    /// Nothing was executing this tick and not everything is completed.
    Stalled,
    /// Work is in flight; sleep and tick again.
    Continue,
}

/// Aggregates chunk visits over one tick.
///
/// A chunk counts as executing if it was executing when visited (even if it
/// completed during the visit), if it was started during the visit, or if a
/// background completion for it was applied during the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTally {
    all_completed: bool,
    any_executing: bool,
}

impl Default for TickTally {
    fn default() -> Self {
        Self {
            all_completed: true,
            any_executing: false,
        }
    }
}

impl TickTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk visit: its status when visited and after any transition.
    pub fn record(&mut self, visited: ChunkStatus, after: ChunkStatus) {
        match visited {
            ChunkStatus::Completed => {}
            ChunkStatus::Executing => {
                self.all_completed = false;
                self.any_executing = true;
            }
            ChunkStatus::Ready => {
                self.all_completed = false;
                if after == ChunkStatus::Executing {
                    self.any_executing = true;
                }
            }
        }
    }

    /// Record a background completion applied during this tick.
    pub fn record_completion(&mut self) {
        self.any_executing = true;
    }

    pub fn all_completed(&self) -> bool {
        self.all_completed
    }

    pub fn any_executing(&self) -> bool {
        self.any_executing
    }

    pub fn verdict(&self) -> Verdict {
        if self.all_completed {
            Verdict::Complete
        } else if !self.any_executing {
            Verdict::Stalled
        } else {
            Verdict::Continue
        }
    }
}
