// pgbackup/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::{BackupError, cause_chain};

/// A finished, fully-written compressed artifact.
#[derive(Debug, Clone)]
pub struct CompressedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Gzips `source` into `dest_dir/artifact_name`.
///
/// The encoder writes to a hidden temporary file in `dest_dir`, which is
/// renamed to the final name only after the stream is finished and synced.
/// An existing file under the final name is never replaced.
pub fn compress_dump(
    source: &Path,
    dest_dir: &Path,
    artifact_name: &str,
) -> Result<CompressedFile, BackupError> {
    compress_inner(source, dest_dir, artifact_name)
        .map_err(|e| BackupError::Compression(cause_chain(&e)))
}

fn compress_inner(source: &Path, dest_dir: &Path, artifact_name: &str) -> Result<CompressedFile> {
    let final_path = dest_dir.join(artifact_name);
    if final_path.exists() {
        return Err(anyhow::anyhow!(
            "Refusing to overwrite existing artifact: {}",
            final_path.display()
        ));
    }

    info!(
        source = %source.display(),
        destination = %final_path.display(),
        "🗜 Compressing dump"
    );

    let input = File::open(source)
        .with_context(|| format!("Failed to open dump file: {}", source.display()))?;
    let mut reader = BufReader::new(input);

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{artifact_name}."))
        .suffix(".tmp")
        .tempfile_in(dest_dir)
        .with_context(|| format!("Failed to create temporary file in {}", dest_dir.display()))?;

    let mut encoder = GzEncoder::new(staging, Compression::default());
    io::copy(&mut reader, &mut encoder)
        .with_context(|| format!("Failed to compress {}", source.display()))?;
    let staging = encoder.finish().with_context(|| {
        format!("Failed to finish Gzip encoding for archive: {}", final_path.display())
    })?;
    staging
        .as_file()
        .sync_all()
        .context("Failed to flush compressed artifact to disk")?;

    staging
        .persist_noclobber(&final_path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move compressed artifact into place: {}", final_path.display()))?;

    let size = std::fs::metadata(&final_path)
        .with_context(|| format!("Failed to stat {}", final_path.display()))?
        .len();

    info!(path = %final_path.display(), size, "✓ Dump compressed");
    Ok(CompressedFile {
        path: final_path,
        size,
    })
}

/// Streaming reader over the decompressed contents of a `.gz` artifact.
pub fn open_decompressed(archive_path: &Path) -> Result<GzDecoder<BufReader<File>>> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "Archive for decompression is not a file: {}",
            archive_path.display()
        ));
    }
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    Ok(GzDecoder::new(BufReader::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn compressed_artifact_round_trips_and_leaves_no_temp_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("backup_t.sql");
        let sql = "CREATE TABLE t (id int);\nINSERT INTO t VALUES (1);\n".repeat(500);
        std::fs::write(&source, &sql)?;

        let out = compress_dump(&source, dir.path(), "backup_t.sql.gz")?;

        assert_eq!(out.path, dir.path().join("backup_t.sql.gz"));
        assert!(out.size > 0 && (out.size as usize) < sql.len());

        let mut restored = String::new();
        open_decompressed(&out.path)?.read_to_string(&mut restored)?;
        assert_eq!(restored, sql);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn refuses_to_overwrite_existing_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("backup_u.sql");
        std::fs::write(&source, "SELECT 1;")?;
        std::fs::write(dir.path().join("backup_u.sql.gz"), b"other run")?;

        let err = compress_dump(&source, dir.path(), "backup_u.sql.gz").unwrap_err();

        assert!(matches!(err, BackupError::Compression(_)));
        assert_eq!(std::fs::read(dir.path().join("backup_u.sql.gz"))?, b"other run");
        Ok(())
    }

    #[test]
    fn unreadable_source_is_a_compression_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = compress_dump(&dir.path().join("missing.sql"), dir.path(), "backup_v.sql.gz")
            .unwrap_err();

        assert!(matches!(err, BackupError::Compression(_)));
        assert!(!dir.path().join("backup_v.sql.gz").exists());
        Ok(())
    }
}
