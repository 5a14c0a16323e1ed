// pgbackup/src/backup/db_dump.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::config::DatabaseParams;
use crate::errors::{BackupError, cause_chain};
use crate::utils::find_pg_executable;

use super::artifact::RunId;

/// Produces a complete logical dump of one database into a file.
#[async_trait]
pub trait DumpTool: Send + Sync {
    async fn dump(&self, params: &DatabaseParams, output: &Path) -> Result<()>;
}

/// `pg_dump` in plain SQL format, restorable with `psql`.
#[derive(Debug, Clone)]
pub struct PgDumpTool {
    program: PathBuf,
}

impl PgDumpTool {
    pub fn locate() -> Result<Self> {
        let program = find_pg_executable("pg_dump")?;
        info!("Found pg_dump executable at: {}", program.display());
        Ok(Self { program })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DumpTool for PgDumpTool {
    async fn dump(&self, params: &DatabaseParams, output: &Path) -> Result<()> {
        let dump_output = Command::new(&self.program)
            .env("PGPASSWORD", &params.password)
            .arg("--host")
            .arg(&params.host)
            .arg("--port")
            .arg(params.port.to_string())
            .arg("--username")
            .arg(&params.user)
            .arg("--dbname")
            .arg(&params.name)
            .arg("--format=plain")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg("--no-password")
            .arg("--file")
            .arg(output)
            .output()
            .with_context(|| format!("Failed to execute pg_dump for database: {}", params.name))?;

        if !dump_output.status.success() {
            return Err(anyhow::anyhow!(
                "pg_dump for database {} failed with status: {}\nStderr: {}",
                params.name,
                dump_output.status,
                String::from_utf8_lossy(&dump_output.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// Uncompressed dump on disk; the file is removed when this value is dropped.
#[derive(Debug)]
pub struct RawDump {
    path: PathBuf,
    size: u64,
}

impl RawDump {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for RawDump {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove raw dump");
            }
        }
    }
}

/// Dumps the configured database to `<work_dir>/backup_<ts>_<suffix>.sql`.
///
/// The output path is claimed with an exclusive create before the tool runs.
/// A path that already exists is left untouched; any later failure removes
/// only the file this call created.
pub async fn produce_dump(
    tool: &dyn DumpTool,
    params: &DatabaseParams,
    work_dir: &Path,
    run: &RunId,
) -> Result<RawDump, BackupError> {
    let path = work_dir.join(run.raw_dump_name());
    info!(
        target_db = %params.display_target(),
        output = %path.display(),
        "🔍 Dumping database"
    );

    claim_output(work_dir, &path).map_err(|e| BackupError::Dump(cause_chain(&e)))?;

    match dump_into(tool, params, &path).await {
        Ok(size) => {
            info!(size, "✓ Dump finished");
            Ok(RawDump { path, size })
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&path) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %rm, "Failed to remove partial dump");
                }
            }
            Err(BackupError::Dump(cause_chain(&e)))
        }
    }
}

fn claim_output(work_dir: &Path, path: &Path) -> Result<()> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create backup directory: {}", work_dir.display()))?;
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(anyhow::anyhow!(
            "Dump file already exists, another run may be in progress: {}",
            path.display()
        )),
        Err(e) => Err(e).with_context(|| format!("Failed to create dump file: {}", path.display())),
    }
}

async fn dump_into(tool: &dyn DumpTool, params: &DatabaseParams, path: &Path) -> Result<u64> {
    tool.dump(params, path).await?;

    let size = fs::metadata(path)
        .with_context(|| format!("Dump tool produced no output at {}", path.display()))?
        .len();
    if size == 0 {
        return Err(anyhow::anyhow!("Dump tool produced an empty file: {}", path.display()));
    }
    Ok(size)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::setting::tests::params;
    use chrono::Utc;

    /// Writes fixed SQL, or fails after leaving a partial file.
    pub(crate) struct ScriptedDump {
        pub sql: Option<String>,
    }

    impl ScriptedDump {
        pub(crate) fn ok(sql: &str) -> Self {
            Self {
                sql: Some(sql.to_string()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self { sql: None }
        }
    }

    #[async_trait]
    impl DumpTool for ScriptedDump {
        async fn dump(&self, _params: &DatabaseParams, output: &Path) -> Result<()> {
            match &self.sql {
                Some(sql) => {
                    fs::write(output, sql)?;
                    Ok(())
                }
                None => {
                    fs::write(output, "-- partial")?;
                    Err(anyhow::anyhow!(
                        "pg_dump failed with status: exit status: 1\nStderr: permission denied for table secrets"
                    ))
                }
            }
        }
    }

    #[tokio::test]
    async fn successful_dump_is_removed_on_drop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let run = RunId::new(Utc::now());

        let raw = produce_dump(&ScriptedDump::ok("SELECT 1;\n"), &params(), dir.path(), &run).await?;
        let path = raw.path().to_path_buf();
        assert_eq!(raw.size(), 10);
        assert!(path.exists());

        drop(raw);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn failed_dump_leaves_nothing_behind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let run = RunId::new(Utc::now());

        let err = produce_dump(&ScriptedDump::failing(), &params(), dir.path(), &run)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Dump(ref msg) if msg.contains("permission denied")));
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn existing_dump_file_is_refused_and_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let run = RunId::new(Utc::now());
        let other = dir.path().join(run.raw_dump_name());
        fs::write(&other, "-- in progress elsewhere")?;

        let err = produce_dump(&ScriptedDump::ok("SELECT 1;\n"), &params(), dir.path(), &run)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Dump(ref msg) if msg.contains("already exists")));
        assert_eq!(fs::read_to_string(&other)?, "-- in progress elsewhere");
        Ok(())
    }

    #[tokio::test]
    async fn empty_dump_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let run = RunId::new(Utc::now());

        let err = produce_dump(&ScriptedDump::ok(""), &params(), dir.path(), &run)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Dump(_)));
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_from_dump_program_is_a_dump_error() -> Result<()> {
        let Ok(false_bin) = which::which("false") else {
            return Ok(());
        };
        let dir = tempfile::tempdir()?;
        let run = RunId::new(Utc::now());

        let err = produce_dump(&PgDumpTool::with_program(false_bin), &params(), dir.path(), &run)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Dump(ref msg) if msg.contains("failed with status")));
        Ok(())
    }
}
