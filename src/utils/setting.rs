// pgbackup/src/utils/setting.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseParams;
use crate::errors::BackupError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded retry: at most `max_attempts` tries with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// An attempt count of zero still makes one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

/// A connection that proved the database is reachable.
#[async_trait]
pub trait LiveConnection: Send {
    async fn server_version(&mut self) -> Result<String>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens one connection, no retries.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &DatabaseParams) -> Result<Box<dyn LiveConnection>>;
}

/// Connects with the given policy, logging every attempt.
///
/// Returns the first live connection, or a `Connection` error carrying the
/// attempt count and the last underlying cause.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    params: &DatabaseParams,
    policy: RetryPolicy,
) -> Result<Box<dyn LiveConnection>, BackupError> {
    let mut last_cause = String::new();

    for attempt in 1..=policy.max_attempts() {
        info!(
            target_db = %params.display_target(),
            attempt,
            max_attempts = policy.max_attempts(),
            "Connecting to database"
        );
        match connector.connect(params).await {
            Ok(conn) => {
                info!(target_db = %params.display_target(), attempt, "✅ Connected");
                return Ok(conn);
            }
            Err(e) => {
                last_cause = format!("{e:#}");
                warn!(attempt, error = %last_cause, "Connection attempt failed");
            }
        }

        if attempt < policy.max_attempts() {
            warn!(
                "Retrying in {} seconds... ({}/{})",
                policy.delay().as_secs(),
                attempt,
                policy.max_attempts()
            );
            tokio::time::sleep(policy.delay()).await;
        }
    }

    Err(BackupError::Connection {
        attempts: policy.max_attempts(),
        last_cause,
    })
}

/// Connector backed by a single sqlx connection.
#[derive(Debug, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, params: &DatabaseParams) -> Result<Box<dyn LiveConnection>> {
        let url = params.connection_url()?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, PgConnection::connect(&url))
            .await
            .with_context(|| {
                format!(
                    "Timed out after {}s connecting to {}",
                    CONNECT_TIMEOUT.as_secs(),
                    params.display_target()
                )
            })?
            .with_context(|| format!("Failed to connect to {}", params.display_target()))?;
        Ok(Box::new(conn))
    }
}

#[async_trait]
impl LiveConnection for PgConnection {
    async fn server_version(&mut self) -> Result<String> {
        sqlx::query_scalar("SHOW server_version")
            .fetch_one(&mut *self)
            .await
            .context("Failed to query server version")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Connection::close(*self)
            .await
            .context("Failed to close database connection")
    }
}
