// pgbackup/src/restore/verification.rs
use std::path::Path;
use tracing::{error, info, warn};

use crate::backup::artifact::RunId;
use crate::config::VerifyConfig;
use crate::errors::{BackupError, cause_chain};

use super::db_restore::VerificationBackend;

/// What a verification run found. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub table_count: i64,
    pub detail: String,
    pub temp_database: String,
}

impl VerificationOutcome {
    /// One line for logs and notifications.
    pub fn summary(&self) -> String {
        if self.passed {
            format!("passed ({} tables)", self.table_count)
        } else {
            format!("FAILED: {}", self.detail)
        }
    }
}

/// Restores `artifact` into a fresh database on the verification server and
/// checks that it contains tables.
///
/// The disposable database is dropped on every path after it was created.
/// Returns `Err` only when the database could not be created; restore and
/// validation problems come back as a failed outcome.
pub async fn verify_backup(
    backend: &dyn VerificationBackend,
    config: &VerifyConfig,
    run: &RunId,
    artifact: &Path,
) -> Result<VerificationOutcome, BackupError> {
    let params = &config.params;
    let temp_db = run.verify_db_name(&params.name);

    info!(
        server = %format!("{}:{}", params.host, params.port),
        temp_db = %temp_db,
        "🔍 Verifying backup by restoring into a temporary database"
    );

    // A name we could not create may belong to someone else; leave it alone.
    backend
        .create_database(params, &temp_db)
        .await
        .map_err(|e| {
            BackupError::Verification(format!(
                "could not create temporary database {temp_db}: {}",
                cause_chain(&e)
            ))
        })?;

    let checked = restore_and_count(backend, config, &temp_db, artifact).await;

    let drop_failure = match backend.drop_database(params, &temp_db).await {
        Ok(()) => None,
        Err(e) => {
            let chain = cause_chain(&e);
            error!(
                temp_db = %temp_db,
                error = %chain,
                "❌ Failed to drop temporary verification database, manual cleanup required"
            );
            Some(chain)
        }
    };

    let mut outcome = match checked {
        Ok(count) if count > 0 => VerificationOutcome {
            passed: true,
            table_count: count,
            detail: format!("restored {count} table(s)"),
            temp_database: temp_db.clone(),
        },
        Ok(count) => VerificationOutcome {
            passed: false,
            table_count: count,
            detail: "restored database contains no tables in schema public".to_string(),
            temp_database: temp_db.clone(),
        },
        Err(detail) => VerificationOutcome {
            passed: false,
            table_count: 0,
            detail,
            temp_database: temp_db.clone(),
        },
    };

    if let Some(chain) = drop_failure {
        outcome
            .detail
            .push_str(&format!("; temporary database {temp_db} was not dropped: {chain}"));
    }

    if outcome.passed {
        info!(tables = outcome.table_count, "✅ Backup verification passed");
    } else {
        warn!(detail = %outcome.detail, "⚠️ Backup verification failed");
    }
    Ok(outcome)
}

async fn restore_and_count(
    backend: &dyn VerificationBackend,
    config: &VerifyConfig,
    temp_db: &str,
    artifact: &Path,
) -> Result<i64, String> {
    backend
        .restore(&config.params, temp_db, artifact)
        .await
        .map_err(|e| format!("restore failed: {}", cause_chain(&e)))?;
    backend
        .count_tables(&config.params, temp_db)
        .await
        .map_err(|e| format!("validation query failed: {}", cause_chain(&e)))
}
