//! I/O for the reconciliation loop: status files, settings, backends.

pub mod backend;
pub mod build_context;
pub mod config;
pub mod container;
pub mod docker;
pub mod domain_store;
pub mod ingest;
pub mod process;
pub mod process_backend;
pub mod run_report;
