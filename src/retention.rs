use crate::errors::AppError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Deletes staging files older than a retention window.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    staging_dir: PathBuf,
}

impl RetentionSweeper {
    pub fn new(staging_dir: PathBuf) -> Self {
        Self { staging_dir }
    }

    /// Sweeps relative to the current time.
    pub fn sweep(&self, keep_days: u32) -> Result<SweepReport, AppError> {
        self.sweep_at(SystemTime::now(), keep_days)
    }

    /// Deletes regular files in the staging directory whose modification time
    /// is strictly before `now - keep_days`. Subdirectories are left alone.
    ///
    /// Only an unreadable directory is an error; a file that cannot be
    /// inspected or deleted is logged, recorded in the report and skipped.
    pub fn sweep_at(&self, now: SystemTime, keep_days: u32) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();
        let window = Duration::from_secs(u64::from(keep_days) * SECS_PER_DAY);
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);

        let entries = match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Staging directory {} does not exist, nothing to sweep", self.staging_dir.display());
                return Ok(report);
            }
            Err(e) => {
                return Err(AppError::Retention {
                    path: self.staging_dir.clone(),
                    message: format!("cannot list directory: {}", e),
                })
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!("Error reading staging entry: {}", e);
                    report.errors.push(e.to_string());
                    continue;
                }
            };
            let path = entry.path();
            if let Err(e) = self.sweep_entry(&path, cutoff, &mut report) {
                tracing::error!(path = %path.display(), error = %e, "Failed to sweep staging file");
                report.errors.push(e.to_string());
            }
        }

        if !report.deleted.is_empty() {
            tracing::info!(
                "Retention sweep removed {} of {} files (keep {} days)",
                report.deleted.len(),
                report.scanned,
                keep_days
            );
        }
        Ok(report)
    }

    fn sweep_entry(&self, path: &Path, cutoff: SystemTime, report: &mut SweepReport) -> Result<(), AppError> {
        let retention_err = |message: String| AppError::Retention {
            path: path.to_path_buf(),
            message,
        };

        let metadata = std::fs::metadata(path).map_err(|e| retention_err(e.to_string()))?;
        if metadata.is_dir() {
            return Ok(());
        }
        report.scanned += 1;

        let modified = metadata
            .modified()
            .map_err(|e| retention_err(format!("no modification time: {}", e)))?;
        if modified < cutoff {
            std::fs::remove_file(path).map_err(|e| retention_err(e.to_string()))?;
            tracing::info!("Old staging file removed: {}", path.display());
            report.deleted.push(path.to_path_buf());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn aged_file(dir: &Path, name: &str, now: SystemTime, days: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(now - Duration::from_secs(days * SECS_PER_DAY))
            .unwrap();
        path
    }

    #[test]
    fn test_old_files_deleted_recent_kept() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = aged_file(dir.path(), "facebook_leads_old.json", now, 31);
        let recent = aged_file(dir.path(), "facebook_leads_recent.json", now, 29);

        let report = RetentionSweeper::new(dir.path().to_path_buf())
            .sweep_at(now, 30)
            .unwrap();

        assert!(!old.exists());
        assert!(recent.exists());
        assert_eq!(report.deleted, vec![old]);
        assert_eq!(report.scanned, 2);
    }

    #[test]
    fn test_subdirectories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let sub = dir.path().join("archive");
        std::fs::create_dir(&sub).unwrap();
        let nested = aged_file(&sub, "facebook_leads_nested.json", now, 90);

        let report = RetentionSweeper::new(dir.path().to_path_buf())
            .sweep_at(now, 30)
            .unwrap();

        assert!(sub.exists());
        assert!(nested.exists());
        assert_eq!(report.scanned, 0);
    }

    #[test]
    fn test_zero_keep_days_removes_everything_older_than_now() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let file = aged_file(dir.path(), "a.json", now, 1);

        RetentionSweeper::new(dir.path().to_path_buf())
            .sweep_at(now, 0)
            .unwrap();
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entry_does_not_stop_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = aged_file(dir.path(), "facebook_leads_old.json", now, 31);
        let dangling = dir.path().join("facebook_leads_broken.json");
        std::os::unix::fs::symlink(dir.path().join("missing-target.json"), &dangling).unwrap();

        let report = RetentionSweeper::new(dir.path().to_path_buf())
            .sweep_at(now, 30)
            .unwrap();

        assert!(!old.exists());
        assert_eq!(report.deleted, vec![old]);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = RetentionSweeper::new(dir.path().join("absent"))
            .sweep(30)
            .unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
