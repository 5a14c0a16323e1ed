// pgbackup/src/notify/mod.rs
pub(crate) mod webhook;

pub use webhook::WebhookChannel;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::backup::logic::{RunResult, RunStatus};
use crate::config::{NotifyConfig, RunConfig};
use crate::errors::{BackupError, cause_chain};
use crate::utils::human_size;

/// Everything a run reports outward, in one flat structure.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub run_id: String,
    pub succeeded: bool,
    pub database: String,
    pub artifact_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub size_human: Option<String>,
    /// Uncompressed dump size, human readable.
    pub raw_size_human: Option<String>,
    pub sha256: Option<String>,
    /// When the artifact's run started, RFC 3339.
    pub backup_time: Option<String>,
    pub storage: String,
    pub remote_key: Option<String>,
    pub duration_secs: f64,
    pub verification: Option<String>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl NotificationPayload {
    pub fn from_run(config: &RunConfig, result: &RunResult) -> Self {
        let artifact = result.artifact.as_ref();
        Self {
            run_id: result.run_id.to_string(),
            succeeded: result.status == RunStatus::Succeeded,
            database: config.database.name.clone(),
            artifact_name: artifact.map(|a| a.name.clone()),
            size_bytes: artifact.map(|a| a.compressed_size),
            size_human: artifact.map(|a| human_size(a.compressed_size)),
            raw_size_human: artifact.map(|a| human_size(a.raw_size)),
            sha256: artifact
                .and_then(|a| a.checksum.as_ref())
                .map(|c| c.hex_digest.clone()),
            backup_time: artifact
                .map(|a| a.created_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            storage: config.target.as_str().to_string(),
            remote_key: artifact.and_then(|a| a.remote_key.clone()),
            duration_secs: result.duration_secs(),
            verification: result.verification.as_ref().map(|v| v.summary()),
            failed_stage: result.failed_stage.map(|s| s.to_string()),
            error: result.error.clone(),
            timestamp: result
                .finished_at
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}

/// Somewhere a run report can be delivered to.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Whether the toggles allow a notification for this outcome.
pub const fn should_notify(config: &NotifyConfig, succeeded: bool) -> bool {
    if succeeded {
        config.on_success
    } else {
        config.on_failure
    }
}

/// Delivers at most one notification for the run.
///
/// Returns whether a message was sent. Delivery problems are returned as
/// `Notification` errors for the caller to log; they never alter the run.
pub async fn notify(
    config: &RunConfig,
    channel: Option<&dyn NotificationChannel>,
    result: &RunResult,
) -> Result<bool, BackupError> {
    let payload = NotificationPayload::from_run(config, result);

    if !should_notify(&config.notify, payload.succeeded) {
        info!(
            succeeded = payload.succeeded,
            "Notification disabled for this outcome, skipping"
        );
        return Ok(false);
    }
    let Some(channel) = channel else {
        info!("Webhook URL not configured, skipping notification");
        return Ok(false);
    };

    match channel.send(&payload).await {
        Ok(()) => {
            info!(
                "📣 Notification sent: {}",
                if payload.succeeded { "success" } else { "failure" }
            );
            Ok(true)
        }
        Err(e) => {
            warn!(error = %cause_chain(&e), "Failed to send notification");
            Err(BackupError::Notification(cause_chain(&e)))
        }
    }
}
