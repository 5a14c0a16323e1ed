// pgbackup/src/backup/mod.rs
pub(crate) mod archive;
pub(crate) mod artifact;
pub(crate) mod checksum;
pub(crate) mod db_dump;
pub(crate) mod logic;
pub(crate) mod retention;
pub(crate) mod s3_upload;
pub(crate) mod storage;

pub use logic::{Backends, RunResult, run_pipeline};

use crate::config::RunConfig;

/// Public entry point for one backup run with the production backends.
pub async fn run_backup_flow(config: &RunConfig) -> RunResult {
    let backends = Backends::from_config(config).await;
    run_pipeline(config, &backends).await
}
