//! Coverage-table errors.

use thiserror::Error;

/// Failures while creating, attaching to, or appending to a coverage table.
#[derive(Debug, Error)]
pub enum TableError {
    /// Every slot is taken; the campaign cannot track another call site.
    #[error("call-site table capacity {capacity} exceeded")]
    CapacityExceeded { capacity: usize },
    /// The mapped region does not start with the table magic.
    #[error("region is not a failonce coverage table (magic {found:#018x})")]
    BadMagic { found: u64 },
    /// The region was formatted by an incompatible layout version.
    #[error("table layout version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    /// The region is shorter than its header claims.
    #[error("region of {len} bytes is too small for the table (need {needed})")]
    RegionTooSmall { len: usize, needed: usize },
    /// Capacity is zero or does not fit the on-disk header.
    #[error("invalid table capacity {0}")]
    InvalidCapacity(usize),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// `mmap` refused the mapping.
    #[error("mmap failed: {0}")]
    Map(std::io::Error),
}
