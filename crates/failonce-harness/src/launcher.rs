//! Starting runs of the target.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use failonce_core::config::{QUIET_ENV, TABLE_ENV};
use failonce_core::{CoverageTable, Termination};

use crate::config::CampaignConfig;
use crate::error::HarnessError;

const PRELOAD_ENV: &str = "LD_PRELOAD";
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Executes one run of the target against the campaign's coverage table.
///
/// The production implementation spawns the target with the shim preloaded;
/// tests substitute scripted launchers that drive the table directly.
pub trait RunLauncher {
    fn launch(&mut self, run_index: u64, table: &CoverageTable<'_>)
    -> Result<Termination, HarnessError>;
}

/// Spawns the target program as a child process with the shim preloaded.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    shim: PathBuf,
    table_path: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    quiet: bool,
}

impl ProcessLauncher {
    /// Launcher for `config`, whose table lives at `table_path`.
    #[must_use]
    pub fn new(config: &CampaignConfig, table_path: &Path) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            // The run may have another working directory than the harness.
            shim: CampaignConfig::absolute(&config.shim),
            table_path: CampaignConfig::absolute(table_path),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout,
            quiet: !config.verbose_shim,
        }
    }

    /// The command a run executes.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.env(
            PRELOAD_ENV,
            preload_value(&self.shim, std::env::var_os(PRELOAD_ENV).as_deref()),
        );
        cmd.env(TABLE_ENV, &self.table_path);
        if self.quiet {
            cmd.env(QUIET_ENV, "1");
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl RunLauncher for ProcessLauncher {
    fn launch(
        &mut self,
        run_index: u64,
        _table: &CoverageTable<'_>,
    ) -> Result<Termination, HarnessError> {
        let mut child = self.command().spawn().map_err(|source| HarnessError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let (status, timed_out) = match self.timeout {
            Some(limit) => wait_with_timeout(&mut child, limit),
            None => child.wait().map(|status| (status, false)),
        }
        .map_err(|source| HarnessError::Wait {
            run: run_index,
            source,
        })?;
        if timed_out {
            return Ok(Termination::TimedOut);
        }
        Termination::from_status(status).ok_or_else(|| HarnessError::Unclassifiable {
            run: run_index,
            status: format!("{status:?}"),
        })
    }
}

/// `LD_PRELOAD` value with `shim` ahead of whatever the harness inherited.
#[must_use]
pub fn preload_value(shim: &Path, inherited: Option<&OsStr>) -> OsString {
    let mut value = OsString::from(shim.as_os_str());
    if let Some(existing) = inherited.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> std::io::Result<(ExitStatus, bool)> {
    let deadline = Instant::now().checked_add(limit);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let _ = child.kill();
            let status = child.wait()?;
            return Ok((status, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
