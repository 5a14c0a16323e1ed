// pgbackup/src/backup/checksum.rs
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::{BackupError, cause_chain};

pub const SIDECAR_EXTENSION: &str = ".sha256";

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

/// Digest of one artifact file, as persisted in its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub algorithm: DigestAlgorithm,
    pub hex_digest: String,
    pub filename: String,
}

impl ChecksumRecord {
    /// `<hex>  <filename>\n`, the layout `sha256sum -c` reads.
    pub fn sidecar_line(&self) -> String {
        format!("{}  {}\n", self.hex_digest, self.filename)
    }

    pub fn parse_sidecar_line(line: &str) -> Option<Self> {
        let (digest, filename) = line.trim_end().split_once("  ")?;
        let valid = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
        if !valid || filename.is_empty() {
            return None;
        }
        Some(Self {
            algorithm: DigestAlgorithm::Sha256,
            hex_digest: digest.to_ascii_lowercase(),
            filename: filename.trim_start_matches('*').to_string(),
        })
    }
}

/// `<artifact>.sha256`
pub fn sidecar_path(artifact_path: &Path) -> PathBuf {
    let mut name = OsString::from(artifact_path.as_os_str());
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

/// Lowercase hex SHA-256 of a file's bytes.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {} while hashing", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes the compressed artifact and writes its sidecar next to it.
pub fn write_checksum(artifact_path: &Path) -> Result<(ChecksumRecord, PathBuf), BackupError> {
    write_checksum_inner(artifact_path).map_err(|e| BackupError::Checksum(cause_chain(&e)))
}

fn write_checksum_inner(artifact_path: &Path) -> Result<(ChecksumRecord, PathBuf)> {
    let filename = artifact_path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Artifact path has no file name: {}", artifact_path.display()))?
        .to_string();

    let record = ChecksumRecord {
        algorithm: DigestAlgorithm::Sha256,
        hex_digest: digest_file(artifact_path)?,
        filename,
    };

    let sidecar = sidecar_path(artifact_path);
    fs::write(&sidecar, record.sidecar_line())
        .with_context(|| format!("Failed to write checksum file {}", sidecar.display()))?;

    info!(
        algorithm = record.algorithm.label(),
        digest = %record.hex_digest,
        sidecar = %sidecar.display(),
        "Checksum generated: {}...",
        &record.hex_digest[..16]
    );
    Ok((record, sidecar))
}

/// Checks an artifact against its sidecar; `Ok(false)` means the bytes changed.
pub fn verify_checksum(artifact_path: &Path) -> Result<bool> {
    let sidecar = sidecar_path(artifact_path);
    let content = fs::read_to_string(&sidecar)
        .with_context(|| format!("Failed to read checksum file {}", sidecar.display()))?;
    let record = content
        .lines()
        .find_map(ChecksumRecord::parse_sidecar_line)
        .with_context(|| format!("No checksum line in {}", sidecar.display()))?;

    let actual_name = artifact_path.file_name().and_then(|n| n.to_str());
    if actual_name != Some(record.filename.as_str()) {
        return Ok(false);
    }
    Ok(digest_file(artifact_path)? == record.hex_digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn digest_is_deterministic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup_x.sql.gz");
        fs::write(&path, vec![7u8; 3 * CHUNK_SIZE + 11])?;

        assert_eq!(digest_file(&path)?, digest_file(&path)?);
        Ok(())
    }

    #[test]
    fn digest_matches_known_vector() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("abc");
        fs::write(&path, b"abc")?;

        assert_eq!(
            digest_file(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }

    #[test]
    fn sidecar_names_artifact_by_file_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup_2026-01-28_00-00-00.sql.gz");
        fs::write(&path, b"compressed bytes")?;

        let (record, sidecar) = write_checksum(&path)?;

        assert_eq!(
            sidecar,
            dir.path().join("backup_2026-01-28_00-00-00.sql.gz.sha256")
        );
        let line = fs::read_to_string(&sidecar)?;
        assert_eq!(
            line,
            format!("{}  backup_2026-01-28_00-00-00.sql.gz\n", record.hex_digest)
        );
        Ok(())
    }

    #[test]
    fn verify_detects_single_byte_mutation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup_a.sql.gz");
        fs::write(&path, b"0123456789")?;
        write_checksum(&path)?;

        assert!(verify_checksum(&path)?);

        fs::write(&path, b"0123456780")?;
        assert!(!verify_checksum(&path)?);
        Ok(())
    }

    #[test]
    fn sidecar_is_accepted_by_sha256sum() -> Result<()> {
        let Ok(tool) = which::which("sha256sum") else {
            return Ok(());
        };
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("backup_b.sql.gz");
        fs::write(&path, b"some gzip bytes")?;
        write_checksum(&path)?;

        let ok = Command::new(&tool)
            .arg("-c")
            .arg("backup_b.sql.gz.sha256")
            .current_dir(dir.path())
            .output()?;
        assert!(ok.status.success());

        fs::write(&path, b"some gzip bytez")?;
        let tampered = Command::new(&tool)
            .arg("-c")
            .arg("backup_b.sql.gz.sha256")
            .current_dir(dir.path())
            .output()?;
        assert!(!tampered.status.success());
        Ok(())
    }

    #[test]
    fn missing_artifact_is_a_checksum_error() {
        let err = write_checksum(Path::new("/nonexistent/backup_c.sql.gz")).unwrap_err();
        assert!(matches!(err, BackupError::Checksum(_)));
    }

    #[test]
    fn parses_binary_mode_marker() {
        let digest = "a".repeat(64);
        let record = ChecksumRecord::parse_sidecar_line(&format!("{digest}  *file.gz")).unwrap();
        assert_eq!(record.filename, "file.gz");
        assert!(ChecksumRecord::parse_sidecar_line("nothex  file").is_none());
    }
}
