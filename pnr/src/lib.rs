//! Predicate-gated workflow orchestrator.
//!
//! A CPUX is an ordered list of design chunks sharing one predicate store. The
//! reconciliation loop starts a chunk once its gatekeeper conditions hold and
//! marks it completed once its flowout conditions hold, until every chunk is
//! completed or nothing can progress. The crate is split the usual way:
//!
//! - **[`core`]**: Pure, deterministic logic (condition matching, the chunk
//!   state machine, tick verdicts, domain invariants). No I/O.
//! - **[`io`]**: Side-effecting operations (status files, settings, child
//!   processes, the container daemon). Backends sit behind
//!   [`io::backend::Backend`] so tests can script them.
//!
//! [`store`] holds the shared predicate store and [`reconcile`] drives the loop.

pub mod core;
pub mod domain;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod reconcile;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
