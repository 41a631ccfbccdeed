use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::RetentionConfig;
use crate::error::{FleetError, Result};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    /// Folder size after the sweep
    pub remaining_bytes: u64,
}

struct Entry {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn list_files(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        entries.push(Entry {
            path: entry.path(),
            modified: meta.modified()?,
            size: meta.len(),
        });
    }
    Ok(entries)
}

/// Bound the size of `dir`.
///
/// Nothing happens while the folder is at or below `high_water`. Above it,
/// files are deleted oldest first until the folder is at or below
/// `low_water`.
pub fn sweep(dir: &Path, high_water: u64, low_water: u64) -> Result<SweepReport> {
    let mut entries = list_files(dir)?;
    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    let mut report = SweepReport {
        remaining_bytes: total,
        ..SweepReport::default()
    };
    if total <= high_water {
        return Ok(report);
    }

    entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    for entry in entries {
        if total <= low_water {
            break;
        }
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                total -= entry.size;
                report.files_deleted += 1;
                report.bytes_freed += entry.size;
                tracing::debug!(path = %entry.path.display(), size = entry.size, "Deleted artifact");
            }
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), error = %e, "Failed to delete artifact");
            }
        }
    }
    report.remaining_bytes = total;
    Ok(report)
}

/// Periodic retention for the node's output folder.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    dir: PathBuf,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(dir: impl Into<PathBuf>, config: RetentionConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        let dir = self.dir.clone();
        let (high, low) = (self.config.high_water_bytes, self.config.low_water_bytes);
        let report = tokio::task::spawn_blocking(move || sweep(&dir, high, low))
            .await
            .map_err(|e| FleetError::Internal(format!("retention sweep panicked: {e}")))??;

        if report.files_deleted > 0 {
            tracing::info!(
                dir = %self.dir.display(),
                files_deleted = report.files_deleted,
                bytes_freed = report.bytes_freed,
                remaining_bytes = report.remaining_bytes,
                "Retention sweep"
            );
        }
        Ok(report)
    }
}
