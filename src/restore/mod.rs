// pgbackup/src/restore/mod.rs
//! Restore-verification: replays an artifact into a disposable database.

pub(crate) mod db_restore;
pub(crate) mod verification;

pub use db_restore::{PgVerificationBackend, VerificationBackend};
pub use verification::{VerificationOutcome, verify_backup};
