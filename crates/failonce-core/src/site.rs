//! Call-site identity.
//!
//! Runs are separate `exec`s, so absolute return addresses move between runs
//! under ASLR. A [`SiteId`] is therefore module-relative: a hash of the object
//! path plus the offset of the return address from that object's load base.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of one allocation call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId {
    /// Truncated BLAKE3 hash of the containing object's path (0 when unknown).
    pub module: u64,
    /// Offset of the return address from the object's load base.
    pub offset: u64,
}

impl SiteId {
    #[must_use]
    pub const fn new(module: u64, offset: u64) -> Self {
        Self { module, offset }
    }

    /// Identity for a return address inside the object loaded from `path` at `base`.
    #[must_use]
    pub fn in_module(path: &[u8], base: usize, return_addr: usize) -> Self {
        Self {
            module: module_tag(path),
            offset: return_addr.wrapping_sub(base) as u64,
        }
    }

    /// Identity for an address that no loaded object claims (JIT code, anonymous maps).
    #[must_use]
    pub const fn unmapped(return_addr: usize) -> Self {
        Self {
            module: 0,
            offset: return_addr as u64,
        }
    }

    /// Identity for an explicit, caller-chosen call-site tag.
    #[must_use]
    pub fn tagged(tag: &str) -> Self {
        Self {
            module: module_tag(b"tag:"),
            offset: module_tag(tag.as_bytes()),
        }
    }
}

/// First eight bytes (little endian) of the BLAKE3 hash of `path`.
#[must_use]
pub fn module_tag(path: &[u8]) -> u64 {
    let hash = blake3::hash(path);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}+{:#x}", self.module, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_relative_to_base() {
        let a = SiteId::in_module(b"/usr/bin/target", 0x5555_0000_0000, 0x5555_0000_1234);
        let b = SiteId::in_module(b"/usr/bin/target", 0x7f00_0000_0000, 0x7f00_0000_1234);
        assert_eq!(a, b);
        assert_eq!(a.offset, 0x1234);
    }

    #[test]
    fn different_modules_do_not_collide() {
        let a = SiteId::in_module(b"/usr/bin/target", 0, 0x40);
        let b = SiteId::in_module(b"/lib/libc.so.6", 0, 0x40);
        assert_ne!(a, b);
    }

    #[test]
    fn tags_are_stable_and_distinct() {
        assert_eq!(SiteId::tagged("open_config"), SiteId::tagged("open_config"));
        assert_ne!(SiteId::tagged("open_config"), SiteId::tagged("parse_line"));
    }

    #[test]
    fn display_is_module_plus_offset() {
        let id = SiteId::new(0xab, 0x10);
        assert_eq!(id.to_string(), "00000000000000ab+0x10");
    }
}
