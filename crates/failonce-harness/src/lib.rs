//! Campaign driver for the failonce allocation fault injector.
//!
//! This crate provides:
//! - Driver loop: re-run the target under the shim until coverage converges
//! - Crash artifacts: archive the core file of every run that dies on a signal
//! - Report generation: human-readable table listing + machine-readable JSON
//! - Structured logging: JSONL campaign events

#![forbid(unsafe_code)]

pub mod artifacts;
pub mod campaign;
pub mod config;
pub mod error;
pub mod launcher;
pub mod report;
pub mod structured_log;

pub use campaign::{Campaign, CampaignSummary, StopReason, run_configured};
pub use config::CampaignConfig;
pub use error::HarnessError;
pub use launcher::{ProcessLauncher, RunLauncher};
pub use report::CampaignReport;
