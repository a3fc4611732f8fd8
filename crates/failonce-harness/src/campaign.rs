//! The driver loop.
//!
//! One campaign re-runs the target until the coverage table converges:
//!
//! ```text
//! Starting -> Running -> Collecting -> Evaluating -+-> Starting (next run)
//!                                                  '-> Finished
//! ```
//!
//! Runs are strictly sequential. The table is shared with every run through
//! the launcher and survives all of them.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use failonce_core::resource::enable_core_dumps;
use failonce_core::{
    ConvergenceDetector, CoverageTable, RunOutcome, SharedRegion, TableSnapshot, Verdict,
};

use crate::artifacts::{ArchivedArtifact, CrashArtifacts};
use crate::config::CampaignConfig;
use crate::error::HarnessError;
use crate::launcher::{ProcessLauncher, RunLauncher};
use crate::report::CampaignReport;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, events};

/// Where the driver loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Collecting,
    Evaluating,
    Finished,
}

/// Why a campaign stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every call site has failed once and later succeeded.
    FullCoverage,
    /// A run left the table exactly as the previous run did.
    Plateau,
    /// The configured run limit was reached first.
    RunLimit,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullCoverage => "full_coverage",
            Self::Plateau => "plateau",
            Self::RunLimit => "run_limit",
        }
    }
}

/// Everything a finished campaign observed.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub runs: Vec<RunOutcome>,
    pub artifacts: Vec<ArchivedArtifact>,
    pub stop_reason: StopReason,
    pub snapshot: TableSnapshot,
}

impl CampaignSummary {
    #[must_use]
    pub fn is_fully_covered(&self) -> bool {
        self.snapshot.is_fully_covered()
    }
}

/// A campaign over one coverage table.
pub struct Campaign<'t, L> {
    table: CoverageTable<'t>,
    launcher: L,
    artifacts: CrashArtifacts,
    shim: PathBuf,
    max_runs: Option<u64>,
    progress: Box<dyn Write + 't>,
    log: Option<LogEmitter>,
    phase: Phase,
}

impl<'t, L: RunLauncher> Campaign<'t, L> {
    /// New campaign reporting progress on stderr.
    pub fn new(table: CoverageTable<'t>, launcher: L, artifacts: CrashArtifacts) -> Self {
        Self {
            table,
            launcher,
            artifacts,
            shim: PathBuf::new(),
            max_runs: None,
            progress: Box::new(std::io::stderr()),
            log: None,
            phase: Phase::Starting,
        }
    }

    /// Name the shim in `ShimNotAttached` errors.
    #[must_use]
    pub fn with_shim(mut self, shim: impl Into<PathBuf>) -> Self {
        self.shim = shim.into();
        self
    }

    #[must_use]
    pub fn with_max_runs(mut self, max_runs: Option<u64>) -> Self {
        self.max_runs = max_runs;
        self
    }

    /// Redirect the human progress lines.
    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn Write + 't>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: LogEmitter) -> Self {
        self.log = Some(log);
        self
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the target until convergence (or the run limit).
    pub fn run(&mut self) -> Result<CampaignSummary, HarnessError> {
        let mut detector = ConvergenceDetector::new();
        let mut runs = Vec::new();
        let mut archived = Vec::new();

        self.emit(
            LogEntry::new("", LogLevel::Info, events::CAMPAIGN_START).with_details(
                serde_json::json!({
                    "capacity": self.table.capacity(),
                    "max_runs": self.max_runs,
                    "crash_path": self.artifacts.crash_path(),
                }),
            ),
        )?;

        let mut run_index = 0u64;
        let (stop_reason, snapshot) = loop {
            run_index += 1;

            self.phase = Phase::Starting;
            self.artifacts.clear()?;
            writeln!(self.progress, "Run {run_index}...")?;
            let attach_before = self.table.attach_count();
            let sites_before = self.table.len();

            self.phase = Phase::Running;
            let termination = self.launcher.launch(run_index, &self.table)?;

            self.phase = Phase::Collecting;
            writeln!(self.progress)?;
            writeln!(self.progress, "Run {run_index} {termination}")?;
            runs.push(RunOutcome {
                run_index,
                termination,
            });

            if termination.is_crash()
                && let Some(artifact) = self.artifacts.archive(run_index)?
            {
                self.emit(
                    LogEntry::new("", LogLevel::Info, events::ARTIFACT_ARCHIVED)
                        .with_run(run_index)
                        .with_artifacts(vec![artifact.path.display().to_string()])
                        .with_details(serde_json::json!({
                            "sha256": artifact.sha256,
                            "size_bytes": artifact.size_bytes,
                        })),
                )?;
                archived.push(artifact);
            }

            if self.table.capacity_exceeded() {
                return Err(self.abort(HarnessError::CapacityExceeded {
                    run: run_index,
                    capacity: self.table.capacity(),
                }));
            }
            if self.table.attach_count() == attach_before {
                return Err(self.abort(HarnessError::ShimNotAttached {
                    run: run_index,
                    shim: self.shim.clone(),
                }));
            }

            self.phase = Phase::Evaluating;
            let snapshot = self.table.snapshot();
            let verdict = detector.evaluate(&snapshot);
            let level = if termination.is_crash() {
                LogLevel::Warn
            } else {
                LogLevel::Info
            };
            self.emit(
                LogEntry::new("", level, events::RUN_COMPLETE)
                    .with_run(run_index)
                    .with_termination(termination)
                    .with_sites(snapshot.len(), snapshot.len().saturating_sub(sites_before))
                    .with_digest(snapshot.digest_hex())
                    .with_details(serde_json::json!({ "verdict": format!("{verdict:?}") })),
            )?;

            let stop = match verdict {
                Verdict::FullCoverage => Some(StopReason::FullCoverage),
                Verdict::Plateau => Some(StopReason::Plateau),
                Verdict::Continue if self.max_runs.is_some_and(|max| run_index >= max) => {
                    Some(StopReason::RunLimit)
                }
                Verdict::Continue => None,
            };
            if let Some(reason) = stop {
                break (reason, snapshot);
            }
        };

        self.artifacts.clear()?;
        self.phase = Phase::Finished;
        self.emit(
            LogEntry::new("", LogLevel::Info, events::CAMPAIGN_FINISHED)
                .with_sites(snapshot.len(), 0)
                .with_digest(snapshot.digest_hex())
                .with_details(serde_json::json!({
                    "runs": run_index,
                    "stop_reason": stop_reason.as_str(),
                    "unrecovered": snapshot.unrecovered().count(),
                })),
        )?;
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }

        Ok(CampaignSummary {
            runs,
            artifacts: archived,
            stop_reason,
            snapshot,
        })
    }

    fn emit(&mut self, entry: LogEntry) -> Result<(), HarnessError> {
        if let Some(log) = self.log.as_mut() {
            log.emit_entry(entry)?;
        }
        Ok(())
    }

    /// Record a fatal error in the log before handing it back.
    fn abort(&mut self, err: HarnessError) -> HarnessError {
        self.phase = Phase::Finished;
        if let Some(log) = self.log.as_mut() {
            let entry = LogEntry::new("", LogLevel::Fatal, events::CAMPAIGN_FINISHED)
                .with_details(serde_json::json!({ "error": err.to_string() }));
            // The campaign error matters more than a failed log write.
            let _ = log.emit_entry(entry).and_then(|()| log.flush());
        }
        err
    }
}

/// Run a whole campaign as configured: table setup, runs, report, cleanup.
///
/// Progress lines go to `progress`. The table file is removed afterwards
/// unless `keep_table` is set, including when the campaign fails.
pub fn run_configured(
    config: &CampaignConfig,
    progress: Box<dyn Write>,
) -> Result<CampaignReport, HarnessError> {
    config.validate()?;
    std::fs::create_dir_all(&config.artifact_dir)?;

    let mut progress = progress;
    if let Err(err) = enable_core_dumps() {
        writeln!(progress, "warning: cannot raise the core dump limit: {err}")?;
    }

    let table_path = config.table_path();
    let region = SharedRegion::create(&table_path, config.capacity)?;
    let result = drive(config, &region, &table_path, progress);
    drop(region);
    if !config.keep_table {
        let _ = std::fs::remove_file(&table_path);
    }
    let report = result?;

    if let Some(path) = &config.report_json {
        std::fs::write(path, report.to_json()?)?;
    }
    Ok(report)
}

fn drive(
    config: &CampaignConfig,
    region: &SharedRegion,
    table_path: &Path,
    progress: Box<dyn Write>,
) -> Result<CampaignReport, HarnessError> {
    let launcher = ProcessLauncher::new(config, table_path);
    let artifacts = CrashArtifacts::new(config.crash_path(), &config.artifact_dir);
    let mut campaign = Campaign::new(region.table(), launcher, artifacts)
        .with_shim(&config.shim)
        .with_max_runs(config.max_runs)
        .with_progress(progress);
    if let Some(path) = &config.log_path {
        campaign = campaign.with_log(LogEmitter::to_file(path, &campaign_id())?);
    }
    let summary = campaign.run()?;
    Ok(CampaignReport::from_summary(&config.program, &summary))
}

/// Identifier for trace ids: `failonce-<pid>-<unix secs>`.
#[must_use]
pub fn campaign_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("failonce-{}-{secs}", std::process::id())
}
