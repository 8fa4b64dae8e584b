//! Gatekeeper and completion checks against a set of resolved facts.
//!
//! Both checks are the same conjunction: every required prompt must be present
//! in `facts` with the same truth value. A missing prompt never passes.

use crate::core::types::{ConditionSet, TruthValue};
use crate::domain::DesignChunk;
use tracing::debug;

/// Why a required condition did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmet {
    /// The prompt has never been asserted.
    Missing { prompt: String },
    /// The prompt exists with a different truth value.
    Mismatch {
        prompt: String,
        want: TruthValue,
        got: TruthValue,
    },
}

impl Unmet {
    pub fn prompt(&self) -> &str {
        match self {
            Unmet::Missing { prompt } | Unmet::Mismatch { prompt, .. } => prompt,
        }
    }
}

/// Return the first unmet requirement in prompt order, or `Ok(())` when all hold.
pub fn check_conditions(required: &ConditionSet, facts: &ConditionSet) -> Result<(), Unmet> {
    for (prompt, want) in required {
        match facts.get(prompt) {
            None => {
                return Err(Unmet::Missing {
                    prompt: prompt.clone(),
                });
            }
            Some(got) if !got.holds_for(want) => {
                return Err(Unmet::Mismatch {
                    prompt: prompt.clone(),
                    want: want.tv,
                    got: got.tv,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// True if the chunk may start.
pub fn satisfies_gatekeeper(chunk: &DesignChunk, facts: &ConditionSet) -> bool {
    report("gatekeeper", chunk, check_conditions(&chunk.gatekeeper, facts))
}

/// True if a started chunk's flowout is fully asserted.
pub fn satisfies_completion(chunk: &DesignChunk, facts: &ConditionSet) -> bool {
    report("completion", chunk, check_conditions(&chunk.flowout, facts))
}

fn report(check: &str, chunk: &DesignChunk, result: Result<(), Unmet>) -> bool {
    match result {
        Ok(()) => true,
        Err(Unmet::Missing { prompt }) => {
            debug!(chunk = %chunk.name, check, %prompt, "condition missing");
            false
        }
        Err(Unmet::Mismatch { prompt, want, got }) => {
            debug!(
                chunk = %chunk.name,
                check,
                %prompt,
                %want,
                %got,
                "condition not met"
            );
            false
        }
    }
}
