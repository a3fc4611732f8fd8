//! Campaign reports: the human table listing and the JSON report.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use failonce_core::{RunOutcome, SiteStatus, TableSnapshot};

use crate::artifacts::ArchivedArtifact;
use crate::campaign::{CampaignSummary, StopReason};

/// Machine-readable campaign report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub report_version: u32,
    pub program: PathBuf,
    pub stop_reason: Option<StopReason>,
    pub runs: Vec<RunOutcome>,
    pub artifacts: Vec<ArchivedArtifact>,
    pub total_sites: usize,
    pub untested: usize,
    pub failed_once: usize,
    pub recovered: usize,
    pub fully_covered: bool,
    pub table_digest: String,
    pub snapshot: TableSnapshot,
}

impl CampaignReport {
    /// Report on a finished campaign.
    #[must_use]
    pub fn from_summary(program: impl Into<PathBuf>, summary: &CampaignSummary) -> Self {
        let mut report = Self::from_snapshot(program, summary.snapshot.clone());
        report.stop_reason = Some(summary.stop_reason);
        report.runs = summary.runs.clone();
        report.artifacts = summary.artifacts.clone();
        report
    }

    /// Report on a bare table, e.g. one kept from an earlier campaign.
    #[must_use]
    pub fn from_snapshot(program: impl Into<PathBuf>, snapshot: TableSnapshot) -> Self {
        Self {
            report_version: 1,
            program: program.into(),
            stop_reason: None,
            runs: Vec::new(),
            artifacts: Vec::new(),
            total_sites: snapshot.len(),
            untested: snapshot.count(SiteStatus::Untested),
            failed_once: snapshot.count(SiteStatus::FailedOnce),
            recovered: snapshot.count(SiteStatus::Recovered),
            fully_covered: snapshot.is_fully_covered(),
            table_digest: snapshot.digest_hex(),
            snapshot,
        }
    }

    /// The table listing printed at the end of a campaign.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if let Some(reason) = self.stop_reason {
            let _ = writeln!(
                out,
                "Campaign stopped after {} run(s): {}",
                self.runs.len(),
                reason.as_str()
            );
        }
        let _ = writeln!(out, "Tested {} memory allocation call sites", self.total_sites);
        let _ = writeln!(out, "\t{:<36}\tTested Success\tTested Failure", "Caller");
        for record in &self.snapshot.records {
            let _ = writeln!(
                out,
                "\t{:<36}\t{}\t\t{}",
                record.site.to_string(),
                yes_no(record.has_succeeded),
                yes_no(record.has_failed)
            );
        }
        if !self.artifacts.is_empty() {
            let _ = writeln!(out, "Crash artifacts:");
            for artifact in &self.artifacts {
                let _ = writeln!(
                    out,
                    "\trun {}\t{}\t{} bytes\tsha256 {}",
                    artifact.run_index,
                    artifact.path.display(),
                    artifact.size_bytes,
                    artifact.sha256
                );
            }
        }
        out
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
