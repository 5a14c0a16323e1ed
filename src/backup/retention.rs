// pgbackup/src/backup/retention.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::BackupError;

use super::artifact::{ARTIFACT_EXTENSION, TIMESTAMP_FORMAT};
use super::checksum::sidecar_path;

/// Result of one pruning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl RetentionReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

fn artifact_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^backup_(\d{4}-\d{2}-\d{2})(?:_(\d{2}-\d{2}-\d{2}))?\.sql\.gz$")
            .expect("artifact name pattern is valid")
    })
}

/// Creation time recorded in an artifact's file name, if it follows the naming scheme.
pub fn recorded_creation_time(file_name: &str) -> Option<DateTime<Utc>> {
    let caps = artifact_name_pattern().captures(file_name)?;
    let date = caps.get(1)?.as_str();
    let naive = match caps.get(2) {
        Some(time) => {
            NaiveDateTime::parse_from_str(&format!("{date}_{}", time.as_str()), TIMESTAMP_FORMAT)
                .ok()?
        }
        None => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?,
    };
    Some(naive.and_utc())
}

/// Whole days between creation and `now`; negative for future timestamps.
pub fn age_in_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days()
}

/// `retention_days == 0` disables pruning entirely.
pub fn should_delete(age_days: i64, retention_days: u32) -> bool {
    retention_days > 0 && age_days >= i64::from(retention_days)
}

/// Deletes local artifacts (and their sidecars) aged `retention_days` or more.
///
/// Age comes from the timestamp in the file name; the modification time is
/// only used for `.sql.gz` files whose names carry none. A file that cannot
/// be removed is recorded in `failed` and does not stop the pass. Only an
/// unreadable directory is an error.
pub fn prune_old_backups(
    backup_dir: &Path,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<RetentionReport, BackupError> {
    let mut report = RetentionReport::default();

    if retention_days == 0 {
        info!("Retention disabled (RETENTION_DAYS=0)");
        return Ok(report);
    }

    info!("Cleaning up backups older than {} days...", retention_days);

    for entry in WalkDir::new(backup_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            BackupError::Retention(format!(
                "Failed to list backup directory {}: {e}",
                backup_dir.display()
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !file_name.ends_with(ARTIFACT_EXTENSION) || file_name.starts_with('.') {
            continue;
        }

        let created_at = match recorded_creation_time(file_name) {
            Some(ts) => ts,
            None => match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(mtime) => DateTime::<Utc>::from(mtime),
                None => {
                    warn!(file = file_name, "Cannot determine backup age, keeping it");
                    continue;
                }
            },
        };

        let age = age_in_days(created_at, now);
        if !should_delete(age, retention_days) {
            continue;
        }

        let path = entry.path().to_path_buf();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(age_days = age, "Deleted old backup: {}", file_name);
                remove_sidecar(&path);
                report.deleted.push(path);
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete old backup: {}", file_name);
                report.failed.push(path);
            }
        }
    }

    if report.deleted.is_empty() {
        info!("No old backups to clean up");
    } else {
        info!("Cleanup complete: {} backup(s) removed", report.deleted_count());
    }
    Ok(report)
}

fn remove_sidecar(artifact: &Path) {
    let sidecar = sidecar_path(artifact);
    match fs::remove_file(&sidecar) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "Failed to delete checksum file: {}", sidecar.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn artifact_aged(dir: &Path, now: DateTime<Utc>, days: i64) -> PathBuf {
        let created = now - Duration::days(days);
        let name = format!("backup_{}.sql.gz", created.format(TIMESTAMP_FORMAT));
        let path = dir.join(&name);
        fs::write(&path, b"gz").unwrap();
        fs::write(sidecar_path(&path), format!("{}  {name}\n", "0".repeat(64))).unwrap();
        path
    }

    #[test]
    fn deletes_artifacts_at_or_past_threshold() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let now = Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap();
        let aged_3 = artifact_aged(dir.path(), now, 3);
        let aged_7 = artifact_aged(dir.path(), now, 7);
        let aged_8 = artifact_aged(dir.path(), now, 8);
        let aged_10 = artifact_aged(dir.path(), now, 10);

        let report = prune_old_backups(dir.path(), 7, now)?;

        assert_eq!(report.deleted_count(), 3);
        assert!(report.failed.is_empty());
        assert!(aged_3.exists() && sidecar_path(&aged_3).exists());
        for gone in [&aged_7, &aged_8, &aged_10] {
            assert!(!gone.exists());
            assert!(!sidecar_path(gone).exists());
        }
        Ok(())
    }

    #[test]
    fn zero_threshold_deletes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let now = Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap();
        let paths: Vec<_> = [0, 3, 100, -2]
            .into_iter()
            .map(|d| artifact_aged(dir.path(), now, d))
            .collect();

        let report = prune_old_backups(dir.path(), 0, now)?;

        assert_eq!(report.deleted_count(), 0);
        assert!(paths.iter().all(|p| p.exists()));
        Ok(())
    }

    #[test]
    fn ignores_unrelated_and_temporary_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let now = Utc::now();
        let notes = dir.path().join("notes.txt");
        let staging = dir.path().join(".backup_2000-01-01_00-00-00.sql.gz.abc123.tmp");
        fs::write(&notes, "notes")?;
        fs::write(&staging, "half written")?;
        fs::create_dir(dir.path().join("backup_2000-01-01.sql.gz"))?;

        let report = prune_old_backups(dir.path(), 7, now)?;

        assert_eq!(report.deleted_count(), 0);
        assert!(notes.exists() && staging.exists());
        Ok(())
    }

    #[test]
    fn name_timestamp_wins_over_mtime() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup_2000-01-01.sql.gz");
        fs::write(&path, b"freshly copied")?;

        let report = prune_old_backups(dir.path(), 7, Utc::now())?;

        assert_eq!(report.deleted, vec![path]);
        Ok(())
    }

    #[test]
    fn unparseable_names_fall_back_to_mtime() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("manual_copy.sql.gz");
        fs::write(&path, b"recent")?;

        let report = prune_old_backups(dir.path(), 7, Utc::now())?;

        assert_eq!(report.deleted_count(), 0);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn missing_directory_is_a_retention_error() {
        let err = prune_old_backups(Path::new("/nonexistent/pgbackup"), 7, Utc::now()).unwrap_err();
        assert!(matches!(err, BackupError::Retention(_)));
    }

    #[test]
    fn parses_both_name_layouts() {
        assert_eq!(
            recorded_creation_time("backup_2026-01-28_13-05-09.sql.gz"),
            Some(Utc.with_ymd_and_hms(2026, 1, 28, 13, 5, 9).unwrap())
        );
        assert_eq!(
            recorded_creation_time("backup_2026-01-28.sql.gz"),
            Some(Utc.with_ymd_and_hms(2026, 1, 28, 0, 0, 0).unwrap())
        );
        assert_eq!(recorded_creation_time("backup_2026-01-28.sql.gz.sha256"), None);
        assert_eq!(recorded_creation_time("backup_latest.sql.gz"), None);
    }

    #[test]
    fn threshold_rule() {
        assert!(should_delete(7, 7));
        assert!(!should_delete(6, 7));
        assert!(!should_delete(-1, 7));
        assert!(!should_delete(0, 0));
        assert!(!should_delete(365, 0));
    }
}
