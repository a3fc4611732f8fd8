//! Campaign configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use failonce_core::config::DEFAULT_CRASH_PATH;
use failonce_core::table::DEFAULT_CAPACITY;

use crate::error::HarnessError;

/// File name of the coverage table when no explicit path is given.
pub const DEFAULT_TABLE_FILE: &str = "failonce-table.bin";

/// Everything a campaign needs to know, as assembled by the CLI.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    /// Target program.
    pub program: PathBuf,
    /// Arguments passed to every run.
    pub args: Vec<OsString>,
    /// Interposition shim to preload into every run.
    pub shim: PathBuf,
    /// Coverage table capacity (distinct call sites).
    pub capacity: usize,
    /// Coverage table file. Defaults to [`DEFAULT_TABLE_FILE`] in the artifact dir.
    pub table_path: Option<PathBuf>,
    /// Well-known crash artifact path, relative to the working directory unless absolute.
    pub crash_path: PathBuf,
    /// Where archived crash artifacts go.
    pub artifact_dir: PathBuf,
    /// Working directory of every run. Defaults to the harness's own.
    pub working_dir: Option<PathBuf>,
    /// Per-run wall-clock limit.
    pub timeout: Option<Duration>,
    /// Stop after this many runs even without convergence.
    pub max_runs: Option<u64>,
    /// Leave the table file in place after the campaign.
    pub keep_table: bool,
    /// Let the shim print its attach banner in every run.
    pub verbose_shim: bool,
    /// JSONL event log.
    pub log_path: Option<PathBuf>,
    /// Machine-readable report.
    pub report_json: Option<PathBuf>,
    /// Fail the campaign when some site never recovered.
    pub require_full_coverage: bool,
}

impl CampaignConfig {
    /// Configuration with defaults for everything but the program and the shim.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, shim: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            shim: shim.into(),
            capacity: DEFAULT_CAPACITY,
            table_path: None,
            crash_path: PathBuf::from(DEFAULT_CRASH_PATH),
            artifact_dir: PathBuf::from("."),
            working_dir: None,
            timeout: None,
            max_runs: None,
            keep_table: false,
            verbose_shim: false,
            log_path: None,
            report_json: None,
            require_full_coverage: false,
        }
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.program.as_os_str().is_empty() {
            return Err(HarnessError::Config("no target program given".into()));
        }
        if self.shim.as_os_str().is_empty() {
            return Err(HarnessError::Config(
                "no shim given (use --shim or FAILONCE_SHIM)".into(),
            ));
        }
        if !self.shim.is_file() {
            return Err(HarnessError::Config(format!(
                "shim {} does not exist",
                self.shim.display()
            )));
        }
        if self.capacity == 0 {
            return Err(HarnessError::Config("capacity must be at least 1".into()));
        }
        if u32::try_from(self.capacity).is_err() {
            return Err(HarnessError::Config(format!(
                "capacity {} exceeds {}",
                self.capacity,
                u32::MAX
            )));
        }
        if self.max_runs == Some(0) {
            return Err(HarnessError::Config("max runs must be at least 1".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(HarnessError::Config("timeout must be nonzero".into()));
        }
        Ok(())
    }

    /// Resolved coverage table path.
    #[must_use]
    pub fn table_path(&self) -> PathBuf {
        self.table_path
            .clone()
            .unwrap_or_else(|| self.artifact_dir.join(DEFAULT_TABLE_FILE))
    }

    /// Resolved well-known crash artifact path.
    #[must_use]
    pub fn crash_path(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) if self.crash_path.is_relative() => dir.join(&self.crash_path),
            _ => self.crash_path.clone(),
        }
    }

    /// Absolute form of `path`, so it stays valid in a run with another working dir.
    #[must_use]
    pub fn absolute(path: &Path) -> PathBuf {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shim_stub() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("failonce-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let shim = dir.join("libshim.so");
        std::fs::write(&shim, b"").expect("write shim");
        shim
    }

    #[test]
    fn defaults_validate() {
        let cfg = CampaignConfig::new("/bin/true", shim_stub());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity, DEFAULT_CAPACITY);
        assert_eq!(cfg.table_path(), PathBuf::from(".").join(DEFAULT_TABLE_FILE));
        assert_eq!(cfg.crash_path(), PathBuf::from("core"));
    }

    #[test]
    fn rejects_bad_capacities() {
        let mut cfg = CampaignConfig::new("/bin/true", shim_stub());
        cfg.capacity = 0;
        assert!(matches!(cfg.validate(), Err(HarnessError::Config(_))));
        cfg.capacity = u32::MAX as usize + 1;
        assert!(matches!(cfg.validate(), Err(HarnessError::Config(_))));
        cfg.capacity = u32::MAX as usize;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_missing_program_or_shim() {
        let cfg = CampaignConfig::new("", shim_stub());
        assert!(cfg.validate().is_err());
        let cfg = CampaignConfig::new("/bin/true", "");
        assert!(cfg.validate().is_err());
        let cfg = CampaignConfig::new("/bin/true", "/nonexistent/libshim.so");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn crash_path_follows_working_dir() {
        let mut cfg = CampaignConfig::new("/bin/true", shim_stub());
        cfg.working_dir = Some(PathBuf::from("/tmp/work"));
        assert_eq!(cfg.crash_path(), PathBuf::from("/tmp/work/core"));
        cfg.crash_path = PathBuf::from("/var/crash/core");
        assert_eq!(cfg.crash_path(), PathBuf::from("/var/crash/core"));
    }

    #[test]
    fn explicit_table_path_wins() {
        let mut cfg = CampaignConfig::new("/bin/true", shim_stub());
        cfg.artifact_dir = PathBuf::from("/tmp/artifacts");
        assert_eq!(cfg.table_path(), PathBuf::from("/tmp/artifacts/failonce-table.bin"));
        cfg.table_path = Some(PathBuf::from("/tmp/t.bin"));
        assert_eq!(cfg.table_path(), PathBuf::from("/tmp/t.bin"));
    }
}
