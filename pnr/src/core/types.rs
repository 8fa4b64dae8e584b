//! Shared deterministic types for the reconciliation core.
//!
//! These types define stable contracts between core components and the JSON
//! files exchanged with chunk processes. They must not depend on external state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resolved truth value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TruthValue {
    #[serde(rename = "Y")]
    Yes,
    #[serde(rename = "N")]
    No,
    #[serde(rename = "U")]
    Unknown,
}

impl fmt::Display for TruthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tv = match self {
            TruthValue::Yes => "Y",
            TruthValue::No => "N",
            TruthValue::Unknown => "U",
        };
        f.write_str(tv)
    }
}

impl std::str::FromStr for TruthValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Y" | "y" => Ok(TruthValue::Yes),
            "N" | "n" => Ok(TruthValue::No),
            "U" | "u" => Ok(TruthValue::Unknown),
            other => Err(format!("truth value must be Y, N or U, got '{other}'")),
        }
    }
}

/// A named fact (prompt and response).
///
/// `response` is informational only. Gating compares `tv` alone, see
/// [`Condition::holds_for`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub prompt: String,
    #[serde(default)]
    pub response: Vec<String>,
    pub tv: TruthValue,
}

impl Condition {
    pub fn new(prompt: impl Into<String>, tv: TruthValue) -> Self {
        Self {
            prompt: prompt.into(),
            response: Vec::new(),
            tv,
        }
    }

    /// True if this resolved fact meets `required`.
    pub fn holds_for(&self, required: &Condition) -> bool {
        self.tv == required.tv
    }
}

/// Conditions keyed by prompt identifier.
///
/// `BTreeMap` keeps iteration (and therefore diagnostics and serialized output)
/// in a stable order.
pub type ConditionSet = BTreeMap<String, Condition>;

/// Lifecycle of a design chunk.
///
/// Only `ready -> executing -> completed` exists; see [`crate::core::transitions`].
/// Deserialization rejects any other value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    #[default]
    Ready,
    Executing,
    Completed,
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            ChunkStatus::Ready => "ready",
            ChunkStatus::Executing => "executing",
            ChunkStatus::Completed => "completed",
        };
        f.write_str(status)
    }
}
