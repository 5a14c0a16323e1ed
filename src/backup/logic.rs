// pgbackup/src/backup/logic.rs
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{RunConfig, VerifyFailurePolicy};
use crate::errors::{BackupError, cause_chain};
use crate::notify::{NotificationChannel, WebhookChannel, notify};
use crate::restore::{PgVerificationBackend, VerificationBackend, VerificationOutcome, verify_backup};
use crate::utils::human_size;
use crate::utils::setting::{Connector, PgConnector, connect_with_retry};

use super::archive::compress_dump;
use super::artifact::{BackupArtifact, RunId};
use super::checksum::{sidecar_path, verify_checksum, write_checksum};
use super::db_dump::{DumpTool, PgDumpTool, produce_dump};
use super::s3_upload::{ObjectStore, S3ObjectStore};
use super::storage::{discard_local_copy, store_artifact};

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connecting,
    Dumping,
    Compressing,
    Checksumming,
    Storing,
    Verifying,
    Notifying,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "CONNECTING",
            Self::Dumping => "DUMPING",
            Self::Compressing => "COMPRESSING",
            Self::Checksumming => "CHECKSUMMING",
            Self::Storing => "STORING",
            Self::Verifying => "VERIFYING",
            Self::Notifying => "NOTIFYING",
            Self::Done => "DONE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Terminal report of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub artifact: Option<BackupArtifact>,
    pub verification: Option<VerificationOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// The single line printed when the process exits.
    pub fn summary_line(&self) -> String {
        match (self.status, &self.artifact) {
            (RunStatus::Succeeded, Some(artifact)) => format!(
                "✅ Backup succeeded: {} ({}) in {:.1}s",
                artifact.name,
                human_size(artifact.compressed_size),
                self.duration_secs()
            ),
            (RunStatus::Succeeded, None) => {
                format!("✅ Backup succeeded in {:.1}s", self.duration_secs())
            }
            (RunStatus::Failed, _) => format!(
                "❌ Backup failed at {}: {} (after {:.1}s)",
                self.failed_stage.map_or_else(|| "UNKNOWN".to_string(), |s| s.to_string()),
                self.error.as_deref().unwrap_or("unknown error"),
                self.duration_secs()
            ),
        }
    }
}

/// The outside world a run talks to.
pub struct Backends {
    pub connector: Arc<dyn Connector>,
    pub dump_tool: Arc<dyn DumpTool>,
    /// Present when the storage target includes the remote bucket.
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub verifier: Arc<dyn VerificationBackend>,
    /// Present when a webhook URL is configured.
    pub channel: Option<Arc<dyn NotificationChannel>>,
}

impl Backends {
    /// Production backends. Missing client tools surface later as stage
    /// failures so the run is still reported.
    pub async fn from_config(config: &RunConfig) -> Self {
        let dump_tool = PgDumpTool::locate().unwrap_or_else(|e| {
            warn!(error = %e, "pg_dump not found in PATH, dumping will fail");
            PgDumpTool::with_program("pg_dump")
        });

        let verifier = if config.verify.enabled {
            PgVerificationBackend::locate().unwrap_or_else(|e| {
                warn!(error = %e, "psql not found in PATH, verification will fail");
                PgVerificationBackend::default()
            })
        } else {
            PgVerificationBackend::default()
        };

        let object_store: Option<Arc<dyn ObjectStore>> = if config.target.includes_remote() {
            info!(
                endpoint = %config.remote.endpoint_url,
                bucket = %config.remote.bucket_name,
                "Configuring S3 client"
            );
            Some(Arc::new(S3ObjectStore::connect(&config.remote).await))
        } else {
            None
        };

        let channel: Option<Arc<dyn NotificationChannel>> =
            match config.notify.webhook_url.as_deref() {
                Some(url) => match WebhookChannel::new(url) {
                    Ok(channel) => Some(Arc::new(channel)),
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "Webhook disabled");
                        None
                    }
                },
                None => None,
            };

        Self {
            connector: Arc::new(PgConnector),
            dump_tool: Arc::new(dump_tool),
            object_store,
            verifier: Arc::new(verifier),
            channel,
        }
    }
}

/// A fatal error together with the stage that raised it.
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: BackupError,
}

fn at(stage: Stage) -> impl FnOnce(BackupError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// What the stages produced so far, kept even when a later stage fails.
#[derive(Default)]
struct Progress {
    artifact: Option<BackupArtifact>,
    verification: Option<VerificationOutcome>,
}

/// Runs one backup from connection to notification.
///
/// Never returns early: every outcome, including failures, ends in a
/// `RunResult` after the notification attempt.
pub async fn run_pipeline(config: &RunConfig, backends: &Backends) -> RunResult {
    run_pipeline_as(RunId::new(Utc::now()), config, backends).await
}

async fn run_pipeline_as(run: RunId, config: &RunConfig, backends: &Backends) -> RunResult {
    info!(
        run = %run,
        database = %config.database.display_target(),
        target = config.target.as_str(),
        "🚀 Starting backup run"
    );

    let mut progress = Progress::default();
    let outcome = execute(config, backends, &run, &mut progress).await;

    let (status, failed_stage, error) = match outcome {
        Ok(()) => (RunStatus::Succeeded, None, None),
        Err(StageFailure { stage, error }) => {
            error!(stage = %stage, error = %error, "❌ Run failed");
            (RunStatus::Failed, Some(stage), Some(error.to_string()))
        }
    };

    let result = RunResult {
        started_at: run.started_at(),
        run_id: run,
        status,
        failed_stage,
        error,
        artifact: progress.artifact,
        verification: progress.verification,
        finished_at: Utc::now(),
    };

    info!(stage = %Stage::Notifying, "Sending notification");
    if let Err(e) = notify(config, backends.channel.as_deref(), &result).await {
        debug_assert!(e.is_suppressed());
        warn!(error = %e, "Notification error ignored, run status unchanged");
    }

    info!(stage = %Stage::Done, status = ?result.status, "Run finished");
    result
}

async fn execute(
    config: &RunConfig,
    backends: &Backends,
    run: &RunId,
    progress: &mut Progress,
) -> Result<(), StageFailure> {
    info!(stage = %Stage::Connecting, "Checking database connectivity");
    let mut conn = connect_with_retry(&*backends.connector, &config.database, config.retry)
        .await
        .map_err(at(Stage::Connecting))?;
    match conn.server_version().await {
        Ok(version) => info!(server_version = %version, "PostgreSQL server reachable"),
        Err(e) => warn!(error = %format!("{e:#}"), "Could not read server version"),
    }
    if let Err(e) = conn.close().await {
        warn!(error = %format!("{e:#}"), "Failed to close connectivity check connection");
    }

    info!(stage = %Stage::Dumping, "Producing logical dump");
    let raw = produce_dump(&*backends.dump_tool, &config.database, &config.backup_dir, run)
        .await
        .map_err(at(Stage::Dumping))?;

    info!(stage = %Stage::Compressing, "Compressing dump");
    let compressed = compress_dump(raw.path(), &config.backup_dir, &run.artifact_name())
        .map_err(at(Stage::Compressing))?;
    let raw_size = raw.size();
    drop(raw);
    info!(
        raw = %human_size(raw_size),
        compressed = %human_size(compressed.size),
        "Raw dump removed after compression"
    );

    let artifact = progress.artifact.insert(BackupArtifact {
        name: run.artifact_name(),
        raw_size,
        compressed_size: compressed.size,
        local_path: Some(compressed.path.clone()),
        remote_key: None,
        checksum: None,
        created_at: run.started_at(),
    });

    info!(stage = %Stage::Checksumming, "Fingerprinting artifact");
    match write_checksum(&compressed.path) {
        Ok((record, _sidecar)) => artifact.checksum = Some(record),
        Err(e) => {
            for leftover in [compressed.path.clone(), sidecar_path(&compressed.path)] {
                match fs::remove_file(&leftover) {
                    Ok(()) => {}
                    Err(rm) if rm.kind() == io::ErrorKind::NotFound => {}
                    Err(rm) => warn!(
                        path = %leftover.display(),
                        error = %rm,
                        "Failed to remove unfingerprinted output"
                    ),
                }
            }
            progress.artifact = None;
            return Err(StageFailure {
                stage: Stage::Checksumming,
                error: e,
            });
        }
    }

    info!(stage = %Stage::Storing, target = config.target.as_str(), "Storing artifact");
    let report = store_artifact(
        config,
        backends.object_store.as_deref(),
        artifact,
        run.started_at(),
        Utc::now(),
    )
    .await
    .map_err(at(Stage::Storing))?;
    if let Some(e) = report.retention_error {
        warn!(error = %e, "Retention error ignored");
    }
    if report.local_copy_removed {
        info!("Remote copy is the system of record, local working copy removed");
    }
    if let Some(pruned) = &report.retention {
        info!(deleted = pruned.deleted_count(), failed = pruned.failed.len(), "Retention pass finished");
    }

    if !config.verify.enabled {
        return Ok(());
    }

    info!(stage = %Stage::Verifying, "Verifying artifact");
    let Some(local_path) = artifact.local_path.clone() else {
        return Err(StageFailure {
            stage: Stage::Verifying,
            error: BackupError::Verification("no local copy of the artifact to restore".into()),
        });
    };
    let verdict = match verify_checksum(&local_path) {
        Ok(true) => verify_backup(&*backends.verifier, &config.verify, run, &local_path).await,
        Ok(false) => Err(BackupError::Verification(format!(
            "stored artifact does not match its checksum: {}",
            local_path.display()
        ))),
        Err(e) => Err(BackupError::Verification(format!(
            "could not check artifact checksum: {}",
            cause_chain(&e)
        ))),
    };

    if !config.target.includes_local() {
        discard_local_copy(artifact);
    }

    let failure = match verdict {
        Ok(outcome) => {
            info!(temp_db = %outcome.temp_database, passed = outcome.passed, "Verification finished");
            let failure = (!outcome.passed).then(|| BackupError::Verification(outcome.detail.clone()));
            progress.verification = Some(outcome);
            failure
        }
        Err(e) => {
            progress.verification = Some(VerificationOutcome {
                passed: false,
                table_count: 0,
                detail: e.to_string(),
                temp_database: String::new(),
            });
            Some(e)
        }
    };

    match (failure, config.verify.failure_policy) {
        (None, _) => Ok(()),
        (Some(error), VerifyFailurePolicy::Fail) => Err(StageFailure {
            stage: Stage::Verifying,
            error,
        }),
        (Some(error), VerifyFailurePolicy::Warn) => {
            warn!(error = %error, "Verification failed, run kept successful (VERIFY_FAILURE_POLICY=warn)");
            Ok(())
        }
    }
}
