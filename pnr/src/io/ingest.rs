//! Status ingestion: merge externally written condition files into the store.
//!
//! Every regular file directly inside the status directory, or symlink to one,
//! is read and decoded as a JSON object of prompt to condition on every tick. Files are never
//! deleted; re-merging unchanged content is a no-op (see
//! [`PredicateStore::merge_all`]). Unreadable or undecodable files are skipped
//! for this pass only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::ConditionSet;
use crate::store::PredicateStore;

/// What one ingestion pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Files decoded and merged, in the order they were applied.
    pub merged: Vec<PathBuf>,
    /// Files skipped because they could not be read or decoded.
    pub skipped: Vec<PathBuf>,
    /// Store entries whose value changed during this pass.
    pub changed: usize,
}

/// Merge every status file in `dir` into `store`.
///
/// Files are applied in file-name order so that two files asserting the same
/// prompt resolve the same way on every tick. Failing to list `dir` is an error.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn ingest_status_dir(dir: &Path, store: &PredicateStore) -> Result<IngestReport> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read status dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => paths.push(path),
            Ok(_) => {}
            // Dangling link: the read below fails and the file is reported as skipped.
            Err(_) => paths.push(path),
        }
    }
    paths.sort();

    let mut report = IngestReport::default();
    for path in paths {
        match read_status_file(&path) {
            Ok(facts) => {
                let changed = store.merge_all(&facts);
                if changed > 0 {
                    debug!(file = %path.display(), changed, "merged status file");
                }
                report.changed += changed;
                report.merged.push(path);
            }
            Err(err) => {
                debug!(file = %path.display(), err = %format!("{err:#}"), "skipping status file");
                report.skipped.push(path);
            }
        }
    }
    Ok(report)
}

/// Decode one status file.
pub fn read_status_file(path: &Path) -> Result<ConditionSet> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read status file {}", path.display()))?;
    let facts: ConditionSet = serde_json::from_str(&contents)
        .with_context(|| format!("parse status file {}", path.display()))?;
    Ok(facts)
}

/// Atomically write a status file (temp file + rename) so a concurrent
/// ingestion pass never sees a half-written document.
pub fn write_status_file(path: &Path, facts: &ConditionSet) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("status path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(facts).context("serialize status file")?;
    buf.push('\n');
    let file_name = path
        .file_name()
        .with_context(|| format!("status path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp status file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace status file {}", path.display()))?;
    Ok(())
}
