//! Staging files: one JSON array of lead records per extraction run.
//!
//! Files are published with write-then-rename so a reader never sees a
//! partially written file, and are never modified once published.

use crate::errors::{AppError, ResultExt};
use crate::models::LeadRecord;
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const STAGING_PREFIX: &str = "facebook_leads_";
const PARTIAL_SUFFIX: &str = ".partial";

/// `facebook_leads_YYYYMMDD_HHMMSS.json`
pub fn staging_file_name(created: NaiveDateTime) -> String {
    format!("{}{}.json", STAGING_PREFIX, created.format("%Y%m%d_%H%M%S"))
}

/// First free path for a run created at `created`; same-second runs get a counter suffix.
fn free_path(dir: &Path, created: NaiveDateTime) -> PathBuf {
    let base = dir.join(staging_file_name(created));
    if !base.exists() {
        return base;
    }
    let stamp = created.format("%Y%m%d_%H%M%S");
    (1..)
        .map(|n| dir.join(format!("{}{}_{}.json", STAGING_PREFIX, stamp, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(base)
}

/// Writes `leads` to a new staging file in `dir` and returns its path.
pub fn publish(dir: &Path, created: NaiveDateTime, leads: &[LeadRecord]) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let target = free_path(dir, created);
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = dir.join(format!(".{}{}", file_name, PARTIAL_SUFFIX));

    let written = write_partial(&partial, leads);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(AppError::staging(&partial, e.to_string()));
    }

    if let Err(e) = std::fs::rename(&partial, &target) {
        let _ = std::fs::remove_file(&partial);
        return Err(AppError::staging(&target, format!("publish failed: {}", e)));
    }

    tracing::debug!(path = %target.display(), records = leads.len(), "Staging file published");
    Ok(target)
}

fn write_partial(path: &Path, leads: &[LeadRecord]) -> Result<(), AppError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, leads)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Reads every record of a staging file, in order.
pub fn read(path: &Path) -> Result<Vec<LeadRecord>, AppError> {
    if !path.is_file() {
        return Err(AppError::staging(path, "staging file not found"));
    }
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).map_err(|e| AppError::staging(path, format!("not a lead list: {}", e)))
}
