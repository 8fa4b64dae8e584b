//! Thread-safe predicate store: the runtime state of one CPUX.
//!
//! Every operation takes the same lock, so no caller ever observes a partially
//! applied merge. Facts are overwritten, never retracted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::types::{Condition, ConditionSet};

/// Shared handle; clones refer to the same table.
#[derive(Debug, Clone, Default)]
pub struct PredicateStore {
    inner: Arc<Mutex<ConditionSet>>,
}

impl PredicateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with an initial runtime state.
    pub fn with_facts(facts: ConditionSet) -> Self {
        Self {
            inner: Arc::new(Mutex::new(facts)),
        }
    }

    pub fn get(&self, prompt: &str) -> Option<Condition> {
        self.lock().get(prompt).cloned()
    }

    /// Overwrite a single fact (last write wins).
    pub fn set(&self, prompt: impl Into<String>, condition: Condition) {
        self.lock().insert(prompt.into(), condition);
    }

    /// Apply many overwrites under one lock acquisition.
    ///
    /// Returns how many entries actually changed, so re-merging identical content
    /// reports zero.
    pub fn merge_all(&self, facts: &ConditionSet) -> usize {
        let mut table = self.lock();
        let mut changed = 0;
        for (prompt, condition) in facts {
            if table.get(prompt) != Some(condition) {
                table.insert(prompt.clone(), condition.clone());
                changed += 1;
            }
        }
        changed
    }

    /// Run `f` against the facts while holding the lock.
    pub fn read<R>(&self, f: impl FnOnce(&ConditionSet) -> R) -> R {
        f(&self.lock())
    }

    /// Copy of the whole table.
    pub fn snapshot(&self) -> ConditionSet {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ConditionSet> {
        // Writers only replace whole entries, so a poisoned table is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
