// pgbackup/src/backup/artifact.rs
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

use super::checksum::ChecksumRecord;

pub const ARTIFACT_PREFIX: &str = "backup_";
pub const ARTIFACT_EXTENSION: &str = ".sql.gz";
pub const RAW_DUMP_EXTENSION: &str = ".sql";

/// Artifact timestamp layout, UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Postgres truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Identity of one pipeline run, fixed at its start.
///
/// Every name a run creates (local file, remote key, disposable database)
/// derives from here, so overlapping runs never share one.
#[derive(Debug, Clone)]
pub struct RunId {
    started_at: DateTime<Utc>,
    suffix: String,
}

impl RunId {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        let mut suffix = uuid::Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        Self { started_at, suffix }
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn timestamp_label(&self) -> String {
        self.started_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// `backup_2026-01-28_00-00-00.sql.gz`
    pub fn artifact_name(&self) -> String {
        format!("{ARTIFACT_PREFIX}{}{ARTIFACT_EXTENSION}", self.timestamp_label())
    }

    /// `backup_2026-01-28_00-00-00_1a2b3c4d.sql`, private to this run.
    pub fn raw_dump_name(&self) -> String {
        format!(
            "{ARTIFACT_PREFIX}{}_{}{RAW_DUMP_EXTENSION}",
            self.timestamp_label(),
            self.suffix
        )
    }

    /// `<base>_20260128000000_1a2b3c4d`, with `base` shortened to fit an identifier.
    pub fn verify_db_name(&self, base: &str) -> String {
        let tail = format!("_{}_{}", self.started_at.format("%Y%m%d%H%M%S"), self.suffix);
        let mut base = base.to_string();
        while base.len() + tail.len() > MAX_IDENTIFIER_LEN {
            base.pop();
        }
        format!("{base}{tail}")
    }
}

/// `2026-01-28_00-00-00-1a2b3c4d`
impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp_label(), self.suffix)
    }
}

/// One run's output, enriched stage by stage.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub name: String,
    pub raw_size: u64,
    pub compressed_size: u64,
    pub local_path: Option<PathBuf>,
    pub remote_key: Option<String>,
    pub checksum: Option<ChecksumRecord>,
    pub created_at: DateTime<Utc>,
}
