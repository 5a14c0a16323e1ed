pub mod setting;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds a PostgreSQL client executable (`pg_dump`, `psql`) in the system PATH.
pub fn find_pg_executable(name: &str) -> Result<PathBuf> {
    which(name).with_context(|| {
        format!(
            "{name} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH."
        )
    })
}

/// `1536` → `1.5 KiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_picks_unit() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn missing_executable_is_an_error() {
        assert!(find_pg_executable("definitely-not-a-real-pg-tool").is_err());
    }
}
