//! The call-site coverage table.
//!
//! The table lives in a caller-provided byte region, normally a `MAP_SHARED`
//! mapping (see [`crate::region`]), so every process that maps the same region
//! observes the same records. All fields are atomics and the layout is
//! `#[repr(C)]`, which makes the region position-independent and valid across
//! processes.
//!
//! ```text
//! +----------------------+  offset 0
//! | TableHeader (32 B)   |  magic, version, capacity, len, attach_count, overflow
//! +----------------------+
//! | SlotCell[capacity]   |  state, flags, module, offset (24 B each)
//! +----------------------+
//! ```
//!
//! Records are append-only. `len` only advances after the slot at `len` is
//! published, so readers never observe a half-written key. Flag updates are
//! `fetch_or`, which keeps them monotonic and lets exactly one caller win the
//! failure for a given site even when several threads race on it.

use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::TableError;
use crate::site::SiteId;
use crate::snapshot::{CallSiteRecord, TableSnapshot};

/// `b"FAILONCE"` read as a little-endian word.
pub const TABLE_MAGIC: u64 = u64::from_le_bytes(*b"FAILONCE");
/// Region layout version written by [`CoverageTable::format`].
pub const LAYOUT_VERSION: u32 = 1;
/// Capacity used when the operator does not choose one.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Flag bit: the site has been failed once.
pub const FLAG_FAILED: u32 = 0x1;
/// Flag bit: the site has been reached and delegated after its failure.
pub const FLAG_SUCCEEDED: u32 = 0x2;

const SLOT_EMPTY: u32 = 0;
const SLOT_CLAIMED: u32 = 1;
const SLOT_PUBLISHED: u32 = 2;
const SLOT_ADOPTING: u32 = 3;

// A claim held this long belongs to a run that died between claim and publish.
const STALE_CLAIM_SPINS: u32 = 1 << 16;
const SPINS_BEFORE_YIELD: u32 = 64;

#[repr(C)]
struct TableHeader {
    magic: AtomicU64,
    version: AtomicU32,
    capacity: AtomicU32,
    len: AtomicU32,
    attach_count: AtomicU32,
    overflow: AtomicU32,
    _reserved: AtomicU32,
}

#[repr(C)]
struct SlotCell {
    state: AtomicU32,
    flags: AtomicU32,
    module: AtomicU64,
    offset: AtomicU64,
}

impl SlotCell {
    fn key(&self) -> SiteId {
        SiteId::new(
            self.module.load(Ordering::Relaxed),
            self.offset.load(Ordering::Relaxed),
        )
    }

    fn write_key(&self, site: SiteId) {
        self.module.store(site.module, Ordering::Relaxed);
        self.offset.store(site.offset, Ordering::Relaxed);
    }
}

/// A handle on a coverage table stored in some region.
///
/// The handle is `Copy`; it borrows the region, it does not own it.
#[derive(Clone, Copy)]
pub struct CoverageTable<'a> {
    header: &'a TableHeader,
    slots: &'a [SlotCell],
}

// SAFETY: every field reachable through the handle is an atomic.
unsafe impl Send for CoverageTable<'_> {}
unsafe impl Sync for CoverageTable<'_> {}

impl std::fmt::Debug for CoverageTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageTable")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("attach_count", &self.attach_count())
            .field("overflow", &self.capacity_exceeded())
            .finish()
    }
}

impl<'a> CoverageTable<'a> {
    /// Bytes needed to hold a table of `capacity` records.
    #[must_use]
    pub const fn region_len(capacity: usize) -> usize {
        size_of::<TableHeader>() + capacity * size_of::<SlotCell>()
    }

    /// Initialize an empty table in a zero-filled region.
    ///
    /// # Safety
    ///
    /// `base` must be 8-byte aligned, valid for reads and writes of `len` bytes for
    /// the whole of `'a`, and zero-filled (a fresh anonymous mapping or a file
    /// extended with `set_len`).
    pub unsafe fn format(
        base: NonNull<u8>,
        len: usize,
        capacity: usize,
    ) -> Result<Self, TableError> {
        if capacity == 0 || u32::try_from(capacity).is_err() {
            return Err(TableError::InvalidCapacity(capacity));
        }
        let needed = Self::region_len(capacity);
        if len < needed {
            return Err(TableError::RegionTooSmall { len, needed });
        }
        // SAFETY: alignment and extent checked above / guaranteed by caller.
        let table = unsafe { Self::from_parts(base, capacity) };
        table.header.version.store(LAYOUT_VERSION, Ordering::Relaxed);
        table
            .header
            .capacity
            .store(capacity as u32, Ordering::Relaxed);
        table.header.magic.store(TABLE_MAGIC, Ordering::Release);
        Ok(table)
    }

    /// Attach to a table previously formatted in `base`.
    ///
    /// # Safety
    ///
    /// `base` must be 8-byte aligned and valid for reads and writes of `len` bytes
    /// for the whole of `'a`.
    pub unsafe fn attach(base: NonNull<u8>, len: usize) -> Result<Self, TableError> {
        if len < size_of::<TableHeader>() {
            return Err(TableError::RegionTooSmall {
                len,
                needed: size_of::<TableHeader>(),
            });
        }
        // SAFETY: the header fits in the region.
        let header = unsafe { &*base.as_ptr().cast::<TableHeader>() };
        let magic = header.magic.load(Ordering::Acquire);
        if magic != TABLE_MAGIC {
            return Err(TableError::BadMagic { found: magic });
        }
        let version = header.version.load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(TableError::VersionMismatch {
                found: version,
                expected: LAYOUT_VERSION,
            });
        }
        let capacity = header.capacity.load(Ordering::Relaxed) as usize;
        if capacity == 0 {
            return Err(TableError::InvalidCapacity(capacity));
        }
        let needed = Self::region_len(capacity);
        if len < needed {
            return Err(TableError::RegionTooSmall { len, needed });
        }
        // SAFETY: extent checked against the recorded capacity.
        Ok(unsafe { Self::from_parts(base, capacity) })
    }

    /// Handle on a table already validated by [`Self::format`] or [`Self::attach`].
    ///
    /// # Safety
    ///
    /// `base` must be 8-byte aligned and valid for reads and writes of
    /// `region_len(capacity)` bytes for the whole of `'a`.
    pub(crate) unsafe fn from_parts(base: NonNull<u8>, capacity: usize) -> Self {
        let header = unsafe { &*base.as_ptr().cast::<TableHeader>() };
        let slots = unsafe {
            std::slice::from_raw_parts(
                base.as_ptr().add(size_of::<TableHeader>()).cast::<SlotCell>(),
                capacity,
            )
        };
        Self { header, slots }
    }

    /// Maximum number of distinct call sites.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of call sites observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.header.len.load(Ordering::Acquire) as usize).min(self.slots.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the record for `site`, appending a fresh one on first observation.
    ///
    /// Fails with [`TableError::CapacityExceeded`] when the table is full; the
    /// overflow flag in the header is raised so that the driver can see the
    /// failure even if the caller exits without reporting it.
    pub fn lookup_or_create(&self, site: SiteId) -> Result<CallSite<'a>, TableError> {
        loop {
            let len = self.len();
            if let Some(found) = self.find(site, len) {
                return Ok(found);
            }
            if len >= self.slots.len() {
                self.header.overflow.store(1, Ordering::Release);
                return Err(TableError::CapacityExceeded {
                    capacity: self.slots.len(),
                });
            }

            let slots: &'a [SlotCell] = self.slots;
            let slot = &slots[len];
            if slot
                .state
                .compare_exchange(SLOT_EMPTY, SLOT_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.write_key(site);
                if slot
                    .state
                    .compare_exchange(
                        SLOT_CLAIMED,
                        SLOT_PUBLISHED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.advance_len(len);
                    return Ok(CallSite { index: len, slot });
                }
                // Adopted by another appender while we were stalled; rescan.
                continue;
            }

            if let Some(adopted) = self.await_publication(slot, len, site) {
                return Ok(adopted);
            }
        }
    }

    fn find(&self, site: SiteId, len: usize) -> Option<CallSite<'a>> {
        let slots: &'a [SlotCell] = self.slots;
        slots[..len]
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.key() == site)
            .map(|(index, slot)| CallSite { index, slot })
    }

    /// Wait for a concurrent appender to publish `slot`. Returns a record only
    /// when the claim was stale and this caller adopted the slot for `site`.
    fn await_publication(
        &self,
        slot: &'a SlotCell,
        index: usize,
        site: SiteId,
    ) -> Option<CallSite<'a>> {
        let mut spins = 0u32;
        loop {
            match slot.state.load(Ordering::Acquire) {
                SLOT_PUBLISHED => {
                    self.advance_len(index);
                    return None;
                }
                SLOT_CLAIMED if spins >= STALE_CLAIM_SPINS => {
                    if slot
                        .state
                        .compare_exchange(
                            SLOT_CLAIMED,
                            SLOT_ADOPTING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        slot.write_key(site);
                        slot.state.store(SLOT_PUBLISHED, Ordering::Release);
                        self.advance_len(index);
                        return Some(CallSite { index, slot });
                    }
                }
                _ => {}
            }
            spins = spins.saturating_add(1);
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn advance_len(&self, published: usize) {
        let _ = self.header.len.compare_exchange(
            published as u32,
            published as u32 + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Owned copy of every published record, in first-observation order.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        let records = self.slots[..self.len()]
            .iter()
            .map(|slot| CallSiteRecord::from_flags(slot.key(), slot.flags.load(Ordering::Acquire)))
            .collect();
        TableSnapshot::new(self.capacity(), records)
    }

    /// Count one more process attaching to the table.
    pub fn note_attach(&self) -> u32 {
        self.header.attach_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// How many times a process has attached since the table was formatted.
    #[must_use]
    pub fn attach_count(&self) -> u32 {
        self.header.attach_count.load(Ordering::Acquire)
    }

    /// True once any lookup has hit capacity.
    #[must_use]
    pub fn capacity_exceeded(&self) -> bool {
        self.header.overflow.load(Ordering::Acquire) != 0
    }
}

/// One record in a [`CoverageTable`].
#[derive(Clone, Copy)]
pub struct CallSite<'a> {
    index: usize,
    slot: &'a SlotCell,
}

impl std::fmt::Debug for CallSite<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSite")
            .field("index", &self.index)
            .field("site", &self.site())
            .field("flags", &self.flags())
            .finish()
    }
}

impl CallSite<'_> {
    /// Position in first-observation order.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn site(&self) -> SiteId {
        self.slot.key()
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.slot.flags.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.flags() & FLAG_FAILED != 0
    }

    #[must_use]
    pub fn has_succeeded(&self) -> bool {
        self.flags() & FLAG_SUCCEEDED != 0
    }

    /// Set `has_failed`. Returns true only for the single caller that set it.
    pub fn claim_failure(&self) -> bool {
        self.slot.flags.fetch_or(FLAG_FAILED, Ordering::AcqRel) & FLAG_FAILED == 0
    }

    /// Set `has_succeeded`.
    pub fn mark_succeeded(&self) {
        self.slot.flags.fetch_or(FLAG_SUCCEEDED, Ordering::AcqRel);
    }
}
