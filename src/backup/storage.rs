// pgbackup/src/backup/storage.rs
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::config::{PathFormat, RunConfig};
use crate::errors::{BackupError, cause_chain};

use super::artifact::BackupArtifact;
use super::checksum::{SIDECAR_EXTENSION, sidecar_path};
use super::retention::{RetentionReport, prune_old_backups};
use super::s3_upload::ObjectStore;

/// What the storing stage did besides placing the artifact.
#[derive(Debug, Default)]
pub struct StorageReport {
    pub retention: Option<RetentionReport>,
    /// Retention failure, logged and otherwise ignored.
    pub retention_error: Option<BackupError>,
    pub local_copy_removed: bool,
}

/// Object key for an artifact under the configured layout.
///
/// `flat` → `<file>`, `monthly` → `<YYYY-MM>/<file>`, `daily` → `<YYYY-MM-DD>/<file>`.
pub fn remote_key(format: PathFormat, run_started: DateTime<Utc>, filename: &str) -> String {
    match format {
        PathFormat::Flat => filename.to_string(),
        PathFormat::Monthly => format!("{}/{}", run_started.format("%Y-%m"), filename),
        PathFormat::Daily => format!("{}/{}", run_started.format("%Y-%m-%d"), filename),
    }
}

/// Places the artifact and its sidecar on every selected target.
///
/// Local placement and remote upload failures are fatal. Retention runs after
/// local placement and its failures are only reported in the returned value.
pub async fn store_artifact(
    config: &RunConfig,
    object_store: Option<&dyn ObjectStore>,
    artifact: &mut BackupArtifact,
    run_started: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<StorageReport, BackupError> {
    let mut report = StorageReport::default();

    let mut local_path = artifact.local_path.clone().ok_or_else(|| {
        BackupError::Storage(format!("Artifact {} has no local working copy", artifact.name))
    })?;

    if config.target.includes_local() {
        let stored = ensure_local_placement(&config.backup_dir, &local_path)
            .map_err(|e| BackupError::Storage(cause_chain(&e)))?;
        info!(path = %stored.display(), "💾 Stored locally");
        artifact.local_path = Some(stored.clone());
        local_path = stored;

        match prune_old_backups(&config.backup_dir, config.retention_days, now) {
            Ok(pruned) => report.retention = Some(pruned),
            Err(e) => {
                warn!(error = %e, "Retention cleanup failed, continuing");
                report.retention_error = Some(e);
            }
        }
    }

    if config.target.includes_remote() {
        let store = object_store.ok_or_else(|| {
            BackupError::Storage("Remote target selected but no object store is configured".into())
        })?;

        let key = remote_key(config.remote.path_format, run_started, &artifact.name);
        let sidecar_key = format!("{key}{SIDECAR_EXTENSION}");

        store
            .put_file(&local_path, &key)
            .await
            .map_err(|e| BackupError::Storage(cause_chain(&e)))?;
        store
            .put_file(&sidecar_path(&local_path), &sidecar_key)
            .await
            .map_err(|e| BackupError::Storage(cause_chain(&e)))?;
        artifact.remote_key = Some(key);

        if !config.target.includes_local() && !config.verify.enabled {
            discard_local_copy(artifact);
            report.local_copy_removed = true;
        }
    }

    Ok(report)
}

fn ensure_local_placement(backup_dir: &Path, artifact_path: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup directory: {}", backup_dir.display()))?;

    let file_name = artifact_path
        .file_name()
        .with_context(|| format!("Artifact path has no file name: {}", artifact_path.display()))?;
    let destination = backup_dir.join(file_name);

    if artifact_path != destination {
        let staged_artifact = stage_copy(artifact_path, backup_dir)?;
        let staged_sidecar = stage_copy(&sidecar_path(artifact_path), backup_dir)?;

        staged_artifact
            .persist_noclobber(&destination)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move artifact into place: {}", destination.display()))?;
        if let Err(e) = staged_sidecar.persist_noclobber(sidecar_path(&destination)) {
            if let Err(rm) = fs::remove_file(&destination) {
                warn!(error = %rm, "Failed to remove artifact placed without its checksum");
            }
            return Err(e.error).with_context(|| {
                format!("Failed to move checksum into place next to {}", destination.display())
            });
        }

        for from in [artifact_path.to_path_buf(), sidecar_path(artifact_path)] {
            fs::remove_file(&from)
                .with_context(|| format!("Failed to remove working file {}", from.display()))?;
        }
    }

    for required in [destination.clone(), sidecar_path(&destination)] {
        let meta = fs::metadata(&required)
            .with_context(|| format!("Stored file is missing: {}", required.display()))?;
        if !meta.is_file() {
            return Err(anyhow::anyhow!("Stored path is not a file: {}", required.display()));
        }
    }
    Ok(destination)
}

/// Copies `from` into a hidden temp file in `dir`, flushed and ready to persist.
fn stage_copy(from: &Path, dir: &Path) -> anyhow::Result<NamedTempFile> {
    let name = from
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Path has no file name: {}", from.display()))?;
    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

    let mut source =
        fs::File::open(from).with_context(|| format!("Failed to open {}", from.display()))?;
    io::copy(&mut source, &mut staged)
        .with_context(|| format!("Failed to copy {} into {}", from.display(), dir.display()))?;
    staged
        .as_file()
        .sync_all()
        .with_context(|| format!("Failed to flush copy of {}", from.display()))?;
    Ok(staged)
}

/// Removes the local working copy (artifact + sidecar) once it is not the system of record.
pub fn discard_local_copy(artifact: &mut BackupArtifact) {
    let Some(path) = artifact.local_path.take() else {
        return;
    };
    for file in [sidecar_path(&path), path] {
        match fs::remove_file(&file) {
            Ok(()) => info!("Removed local working copy: {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to remove local working copy: {}", file.display()),
        }
    }
}
