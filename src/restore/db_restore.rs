// pgbackup/src/restore/db_restore.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use crate::backup::archive::open_decompressed;
use crate::config::DatabaseParams;
use crate::utils::find_pg_executable;

/// Database the admin connection lands on to create and drop others.
const MAINTENANCE_DB: &str = "postgres";

/// Server-side operations the verifier needs.
///
/// `params` always carries the verification server's connection settings;
/// the database being operated on is passed separately.
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// Must fail if `db_name` already exists.
    async fn create_database(&self, params: &DatabaseParams, db_name: &str) -> Result<()>;

    async fn restore(&self, params: &DatabaseParams, db_name: &str, artifact: &Path) -> Result<()>;

    async fn count_tables(&self, params: &DatabaseParams, db_name: &str) -> Result<i64>;

    async fn drop_database(&self, params: &DatabaseParams, db_name: &str) -> Result<()>;
}

/// PostgreSQL verification server, driven through sqlx and `psql`.
#[derive(Debug, Clone, Default)]
pub struct PgVerificationBackend {
    psql: Option<PathBuf>,
}

impl PgVerificationBackend {
    pub fn locate() -> Result<Self> {
        let psql = find_pg_executable("psql")?;
        info!("Found psql executable at: {}", psql.display());
        Ok(Self { psql: Some(psql) })
    }

    fn psql(&self) -> Result<PathBuf> {
        match &self.psql {
            Some(path) => Ok(path.clone()),
            None => find_pg_executable("psql"),
        }
    }

    async fn admin_connection(params: &DatabaseParams) -> Result<PgConnection> {
        let url = params.with_database(MAINTENANCE_DB).connection_url()?;
        PgConnection::connect(&url).await.with_context(|| {
            format!(
                "Failed to connect to '{}' database on verification server {}:{}",
                MAINTENANCE_DB, params.host, params.port
            )
        })
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl VerificationBackend for PgVerificationBackend {
    async fn create_database(&self, params: &DatabaseParams, db_name: &str) -> Result<()> {
        let mut admin = Self::admin_connection(params).await?;
        info!("Creating temp database: {}", db_name);
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(db_name)))
            .execute(&mut admin)
            .await
            .with_context(|| format!("Failed to create database '{db_name}'"))?;
        admin.close().await.ok();
        Ok(())
    }

    async fn restore(&self, params: &DatabaseParams, db_name: &str, artifact: &Path) -> Result<()> {
        let psql = self.psql()?;
        let target = params.with_database(db_name);
        let artifact = artifact.to_path_buf();

        info!(
            "Restoring {} into temp database {} (using psql)",
            artifact.display(),
            db_name
        );

        tokio::task::spawn_blocking(move || pipe_into_psql(&psql, &target, &artifact))
            .await
            .context("Restore task panicked")?
    }

    async fn count_tables(&self, params: &DatabaseParams, db_name: &str) -> Result<i64> {
        let url = params.with_database(db_name).connection_url()?;
        let mut conn = PgConnection::connect(&url)
            .await
            .with_context(|| format!("Failed to connect to restored database '{db_name}'"))?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&mut conn)
        .await
        .with_context(|| format!("Failed to count tables in '{db_name}'"))?;
        conn.close().await.ok();
        Ok(count)
    }

    async fn drop_database(&self, params: &DatabaseParams, db_name: &str) -> Result<()> {
        let mut admin = Self::admin_connection(params).await?;
        info!("Dropping temp database: {}", db_name);

        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(db_name)
        .execute(&mut admin)
        .await
        .with_context(|| format!("Failed to terminate connections to database '{db_name}'"))?;

        sqlx::query(&format!("DROP DATABASE IF EXISTS {}", quote_ident(db_name)))
            .execute(&mut admin)
            .await
            .with_context(|| format!("Failed to drop database '{db_name}'"))?;
        admin.close().await.ok();
        Ok(())
    }
}

/// Streams the decompressed artifact into `psql`'s stdin.
///
/// The password travels in `PGPASSWORD`, never on the command line.
fn pipe_into_psql(psql: &Path, target: &DatabaseParams, artifact: &Path) -> Result<()> {
    let mut reader = open_decompressed(artifact)?;

    let mut child = Command::new(psql)
        .env("PGPASSWORD", &target.password)
        .arg("-X") // Do not read psqlrc
        .arg("-q") // Quiet mode
        .arg("-v")
        .arg("ON_ERROR_STOP=1") // Exit on first error
        .arg("--no-password")
        .arg("--host")
        .arg(&target.host)
        .arg("--port")
        .arg(target.port.to_string())
        .arg("--username")
        .arg(&target.user)
        .arg("--dbname")
        .arg(&target.name)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to start psql for restore")?;

    let mut stdin = child.stdin.take().context("psql stdin was not captured")?;
    let writer = std::thread::spawn(move || -> io::Result<u64> {
        let copied = io::copy(&mut reader, &mut stdin)?;
        stdin.flush()?;
        Ok(copied)
    });

    let output = child
        .wait_with_output()
        .context("Failed to wait for psql")?;
    let fed = writer
        .join()
        .map_err(|_| anyhow::anyhow!("Restore input thread panicked"))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "psql restore failed with status: {}\nStderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    let fed = fed.with_context(|| format!("Failed to stream {} into psql", artifact.display()))?;
    info!(bytes = fed, "✓ Restore finished");
    Ok(())
}
