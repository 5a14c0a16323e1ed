//! PostgreSQL backup job
//!
//! One invocation performs one backup run: dump, compress, fingerprint, store,
//! prune, optionally verify, notify. Configuration comes from the environment.

// pgbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod notify;
mod restore;
mod utils;

use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{LogFormat, RunConfig};

/// Main entry point for the backup job
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // A missing .env file is fine; the process environment is used as-is.
    let _ = dotenv::dotenv();

    let config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(config.log_format) {
        eprintln!("❌ Error: {e:?}");
        return ExitCode::FAILURE;
    }

    let result = backup::run_backup_flow(&config).await;
    if result.is_success() {
        println!("{}", result.summary_line());
        ExitCode::SUCCESS
    } else {
        eprintln!("{}", result.summary_line());
        ExitCode::FAILURE
    }
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    }
    .context("Failed to initialise logging")
}
