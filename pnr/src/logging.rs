//! Tracing setup for the `pnr` binary.
//!
//! Chunk transitions, backend calls and terminal outcomes are logged through
//! `tracing`; this installs the stderr subscriber. The optional run report
//! (`io/run_report`) is the machine-readable record and does not depend on
//! `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pnr=debug pnr run --domain config/domain.json --cpux stack
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
