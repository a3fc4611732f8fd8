//! # failonce-core
//!
//! Shared state and decision logic for the failonce allocation-failure harness.
//!
//! A campaign re-executes a target program many times. Every run maps the same
//! [`CoverageTable`], so knowledge of which allocation call sites have already been
//! failed accumulates across otherwise independent processes.
//!
//! ```text
//! shim (per run) -> policy::decide -> CoverageTable <- ConvergenceDetector (driver)
//! ```
//!
//! This crate holds no process-global state: the table is always passed explicitly.
//! The `cdylib` shim and the driver each obtain their own handle from a
//! [`SharedRegion`].

pub mod config;
pub mod convergence;
pub mod error;
pub mod outcome;
pub mod policy;
pub mod region;
pub mod resource;
pub mod site;
pub mod snapshot;
pub mod table;

pub use convergence::{ConvergenceDetector, Verdict};
pub use error::TableError;
pub use outcome::{RunOutcome, Termination};
pub use policy::{Decision, decide};
pub use region::SharedRegion;
pub use site::SiteId;
pub use snapshot::{CallSiteRecord, SiteStatus, TableSnapshot};
pub use table::{CallSite, CoverageTable};
