//! CLI entrypoint for the failonce allocation fault injector.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use failonce_core::SharedRegion;
use failonce_core::config::{DEFAULT_CRASH_PATH, SHIM_ENV};
use failonce_core::table::DEFAULT_CAPACITY;
use failonce_harness::{CampaignConfig, CampaignReport, run_configured};

/// Fail every allocation call site of a program exactly once.
#[derive(Debug, Parser)]
#[command(name = "failonce")]
#[command(about = "Allocation-failure fault injection harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Re-run a program under the shim until every call site is covered.
    Run {
        /// Interposition shim (libfailonce_abi.so). Falls back to $FAILONCE_SHIM.
        #[arg(long)]
        shim: Option<PathBuf>,
        /// Maximum number of distinct call sites.
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
        /// Coverage table file (default: failonce-table.bin in the artifact dir).
        #[arg(long)]
        table: Option<PathBuf>,
        /// Where a crashing run leaves its core file.
        #[arg(long, default_value = DEFAULT_CRASH_PATH)]
        crash_path: PathBuf,
        /// Directory for archived crash artifacts.
        #[arg(long, default_value = ".")]
        artifact_dir: PathBuf,
        /// Working directory of every run.
        #[arg(long)]
        working_dir: Option<PathBuf>,
        /// Kill a run after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Stop after this many runs.
        #[arg(long)]
        max_runs: Option<u64>,
        /// Structured JSONL event log.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Write a JSON report here.
        #[arg(long)]
        report_json: Option<PathBuf>,
        /// Keep the coverage table file after the campaign.
        #[arg(long)]
        keep_table: bool,
        /// Let the shim print its attach banner in every run.
        #[arg(long)]
        verbose_shim: bool,
        /// Exit nonzero when some call site never recovered.
        #[arg(long)]
        require_full_coverage: bool,
        /// Program and arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        target: Vec<OsString>,
    },
    /// Print the contents of a kept coverage table.
    Report {
        /// Coverage table file.
        #[arg(long)]
        table: PathBuf,
        /// Emit JSON instead of the table listing.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            shim,
            capacity,
            table,
            crash_path,
            artifact_dir,
            working_dir,
            timeout_ms,
            max_runs,
            log,
            report_json,
            keep_table,
            verbose_shim,
            require_full_coverage,
            target,
        } => {
            let mut target = target.into_iter();
            let program = target.next().map(PathBuf::from).unwrap_or_default();
            let shim = shim
                .or_else(|| std::env::var_os(SHIM_ENV).map(PathBuf::from))
                .unwrap_or_default();

            let mut config = CampaignConfig::new(program, shim);
            config.args = target.collect();
            config.capacity = capacity;
            config.table_path = table;
            config.crash_path = crash_path;
            config.artifact_dir = artifact_dir;
            config.working_dir = working_dir;
            config.timeout = timeout_ms.map(Duration::from_millis);
            config.max_runs = max_runs;
            config.log_path = log;
            config.report_json = report_json;
            config.keep_table = keep_table;
            config.verbose_shim = verbose_shim;
            config.require_full_coverage = require_full_coverage;

            let report = run_configured(&config, Box::new(std::io::stderr()))?;
            eprint!("{}", report.to_text());
            if config.require_full_coverage && !report.fully_covered {
                return Err(format!(
                    "{} of {} call sites never recovered from their injected failure",
                    report.total_sites - report.recovered,
                    report.total_sites
                )
                .into());
            }
        }
        Command::Report { table, json } => {
            let region = SharedRegion::open(&table)?;
            let report = CampaignReport::from_snapshot(&table, region.table().snapshot());
            if json {
                println!("{}", report.to_json()?);
            } else {
                eprint!("{}", report.to_text());
            }
        }
    }

    Ok(())
}
