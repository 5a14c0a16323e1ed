use thiserror::Error;

/// Failure taxonomy of a backup run.
///
/// Every stage reports exactly one of these. Whether a variant aborts the run
/// is decided by the orchestrator, not by the stage that raised it:
/// `Retention` and `Notification` are logged and swallowed, `Verification`
/// follows the configured policy, everything else is fatal.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed after {attempts} attempt(s): {last_cause}")]
    Connection { attempts: u32, last_cause: String },

    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Checksum failed: {0}")]
    Checksum(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Retention cleanup failed: {0}")]
    Retention(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl BackupError {
    /// Errors the orchestrator never lets abort a run.
    pub const fn is_suppressed(&self) -> bool {
        matches!(self, Self::Retention(_) | Self::Notification(_))
    }
}

/// Renders an anyhow error with its whole context chain on one line.
pub fn cause_chain(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn only_retention_and_notification_are_suppressed() {
        assert!(BackupError::Retention("x".into()).is_suppressed());
        assert!(BackupError::Notification("x".into()).is_suppressed());
        assert!(!BackupError::Dump("x".into()).is_suppressed());
        assert!(!BackupError::Verification("x".into()).is_suppressed());
        assert!(
            !BackupError::Connection {
                attempts: 3,
                last_cause: "refused".into()
            }
            .is_suppressed()
        );
    }

    #[test]
    fn connection_error_names_attempts_and_cause() {
        let err = BackupError::Connection {
            attempts: 3,
            last_cause: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection failed after 3 attempt(s): connection refused"
        );
    }

    #[test]
    fn cause_chain_keeps_context() {
        let err = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("writing sidecar")
            .unwrap_err();
        assert_eq!(cause_chain(&err), "writing sidecar: disk full");
    }
}
