//! Shim configuration.
//!
//! The driver passes configuration to each run through the environment:
//! - `FAILONCE_TABLE`: path of the coverage table file. When unset the shim
//!   attaches to nothing and every allocation passes straight through.
//! - `FAILONCE_QUIET`: `1`/`true`/`yes`/`on` suppresses the shim's attach banner.
//!
//! The shim reads these once, from its constructor, while its reentry guard is
//! held; allocations made by `std::env` during parsing therefore bypass the
//! failure policy.

use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable naming the coverage table file.
pub const TABLE_ENV: &str = "FAILONCE_TABLE";
/// Environment variable silencing the attach banner.
pub const QUIET_ENV: &str = "FAILONCE_QUIET";
/// Environment variable the CLI falls back to for the shim path.
pub const SHIM_ENV: &str = "FAILONCE_SHIM";
/// Crash artifact location written by the kernel with the default `core_pattern`.
pub const DEFAULT_CRASH_PATH: &str = "core";

/// Configuration read by the preloaded shim in every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShimConfig {
    pub table_path: Option<PathBuf>,
    pub quiet: bool,
}

impl ShimConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var_os(TABLE_ENV),
            std::env::var_os(QUIET_ENV),
        )
    }

    /// Build a configuration from raw variable values.
    #[must_use]
    pub fn from_vars(table: Option<OsString>, quiet: Option<OsString>) -> Self {
        Self {
            table_path: table.filter(|v| !v.is_empty()).map(PathBuf::from),
            quiet: quiet
                .as_deref()
                .and_then(|v| v.to_str())
                .is_some_and(parse_flag),
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_table_means_passthrough() {
        let cfg = ShimConfig::from_vars(None, None);
        assert_eq!(cfg, ShimConfig::default());
        assert!(cfg.table_path.is_none());
    }

    #[test]
    fn empty_table_is_ignored() {
        assert!(
            ShimConfig::from_vars(Some(OsString::new()), None)
                .table_path
                .is_none()
        );
    }

    #[test]
    fn table_path_is_taken_verbatim() {
        let cfg = ShimConfig::from_vars(Some("/tmp/t.bin".into()), None);
        assert_eq!(cfg.table_path, Some(PathBuf::from("/tmp/t.bin")));
    }

    #[test]
    fn quiet_flag_parsing() {
        for on in ["1", "true", "YES", " on "] {
            assert!(ShimConfig::from_vars(None, Some(on.into())).quiet, "{on}");
        }
        for off in ["0", "false", "", "maybe"] {
            assert!(!ShimConfig::from_vars(None, Some(off.into())).quiet, "{off}");
        }
    }
}
