//! Packaging a directory into an image build context.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::debug;

/// File the daemon builds from, at the root of the context.
pub const DOCKERFILE: &str = "Dockerfile";

/// Tar `dir` with paths relative to `dir` itself.
///
/// Symlinks are archived as links rather than followed.
pub fn package_build_context(dir: &Path) -> Result<Vec<u8>> {
    if !dir.is_dir() {
        bail!("build path {} is not a directory", dir.display());
    }
    if !dir.join(DOCKERFILE).is_file() {
        bail!("build path {} has no {DOCKERFILE}", dir.display());
    }
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .with_context(|| format!("archive build context {}", dir.display()))?;
    let archive = builder
        .into_inner()
        .with_context(|| format!("finish build context {}", dir.display()))?;
    debug!(dir = %dir.display(), bytes = archive.len(), "packaged build context");
    Ok(archive)
}
