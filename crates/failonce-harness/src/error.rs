use std::path::PathBuf;

use failonce_core::TableError;

/// Errors that end a campaign.
///
/// Target misbehavior (nonzero exits, signals, timeouts) is not an error: it
/// is recorded in the run outcome and the campaign continues.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("coverage table: {0}")]
    Table(#[from] TableError),
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for run {run}: {source}")]
    Wait {
        run: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("run {run} ended with an unclassifiable status: {status}")]
    Unclassifiable { run: u64, status: String },
    #[error("run {run} exceeded the coverage table capacity of {capacity} call sites")]
    CapacityExceeded { run: u64, capacity: usize },
    #[error(
        "run {run}: the shim did not attach to the coverage table (is {} preloadable?)",
        shim.display()
    )]
    ShimNotAttached { run: u64, shim: PathBuf },
    #[error("crash artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
