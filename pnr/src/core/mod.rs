//! Deterministic, pure logic shared by the reconciliation loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod evaluator;
pub mod invariants;
pub mod transitions;
pub mod types;
pub mod verdict;
