use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{ResultRow, VerificationResult};
use crate::store::Snapshot;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRow {
    #[serde(rename = "DOT_NUMBER")]
    dot_number: u64,
}

/// Where the results and checkpoint files live.
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub results: PathBuf,
    pub checkpoint: PathBuf,
}

impl SnapshotPaths {
    pub fn new(results: impl Into<PathBuf>, checkpoint: impl Into<PathBuf>) -> Self {
        SnapshotPaths {
            results: results.into(),
            checkpoint: checkpoint.into(),
        }
    }

    /// Persist both files. Each is replaced whole, never left half-written.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        write_atomic(&self.results, |w| {
            for result in &snapshot.results {
                w.serialize(ResultRow::from(result))?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to write results to {}", self.results.display()))?;

        write_atomic(&self.checkpoint, |w| {
            for &dot_number in &snapshot.processed {
                w.serialize(CheckpointRow { dot_number })?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to write checkpoint to {}", self.checkpoint.display()))?;

        debug!(
            "Snapshot saved: {} results, {} processed",
            snapshot.results.len(),
            snapshot.processed.len()
        );
        Ok(())
    }

    pub fn load_checkpoint(&self) -> Result<HashSet<u64>> {
        load_checkpoint(&self.checkpoint)
    }

    pub fn load_results(&self) -> Result<HashMap<u64, VerificationResult>> {
        load_results(&self.results)
    }
}

/// Processed DOT numbers from an earlier run; a missing file means a fresh start.
pub fn load_checkpoint(path: &Path) -> Result<HashSet<u64>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open checkpoint {}", path.display()))?;
    let mut processed = HashSet::new();
    for row in reader.deserialize::<CheckpointRow>() {
        let row = row.with_context(|| format!("Bad checkpoint row in {}", path.display()))?;
        processed.insert(row.dot_number);
    }
    Ok(processed)
}

/// Verified records from an earlier run, keyed by DOT number.
pub fn load_results(path: &Path) -> Result<HashMap<u64, VerificationResult>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open results {}", path.display()))?;
    let mut results = HashMap::new();
    for row in reader.deserialize::<ResultRow>() {
        let row = row.with_context(|| format!("Bad results row in {}", path.display()))?;
        let result = VerificationResult::from(row);
        results.insert(result.dot_number(), result);
    }
    Ok(results)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write through `<path>.tmp`, then rename over `path`.
fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<()>,
{
    let tmp = tmp_path(path);
    let file = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    fill(&mut writer)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}
