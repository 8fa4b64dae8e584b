//! Stable exit codes for `pnr` commands.

/// Command succeeded. `pnr run` also exits with this on a stall unless
/// `--fail-on-stall` is given.
pub const OK: i32 = 0;
/// Invalid domain/settings, backend failure, iteration cap, or any other error.
pub const FAILED: i32 = 1;
/// `pnr run --fail-on-stall` stopped because no chunk could make progress.
pub const STALLED: i32 = 3;
