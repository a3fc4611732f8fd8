//! Memory regions that hold a [`CoverageTable`].
//!
//! The driver creates a file-backed region before the first run; each run's shim
//! opens the same file and maps it `MAP_SHARED`, so all of them write to the same
//! physical pages. Anonymous shared regions cover in-process use and processes
//! related by `fork`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::error::TableError;
use crate::table::CoverageTable;

/// An owned `MAP_SHARED` mapping holding a formatted coverage table.
#[derive(Debug)]
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
    capacity: usize,
    path: Option<PathBuf>,
}

// SAFETY: the mapping is plain shared memory and every access goes through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or truncate) `path`, size it for `capacity` records, and format an
    /// empty table in it.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, TableError> {
        if capacity == 0 || u32::try_from(capacity).is_err() {
            return Err(TableError::InvalidCapacity(capacity));
        }
        let len = CoverageTable::region_len(capacity);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let base = map_shared(Some(&file), len)?;
        let region = Self {
            base,
            len,
            capacity,
            path: Some(path.to_path_buf()),
        };
        // SAFETY: fresh zero-filled mapping of `len` bytes, page aligned.
        unsafe { CoverageTable::format(region.base, region.len, capacity)? };
        Ok(region)
    }

    /// Map an existing table file created by [`Self::create`].
    pub fn open(path: &Path) -> Result<Self, TableError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| TableError::Io(io::Error::other("table file too large")))?;
        if len == 0 {
            return Err(TableError::RegionTooSmall { len, needed: 1 });
        }
        let base = map_shared(Some(&file), len)?;
        let mut region = Self {
            base,
            len,
            capacity: 0,
            path: Some(path.to_path_buf()),
        };
        // SAFETY: mapping of `len` bytes owned by `region`.
        region.capacity = unsafe { CoverageTable::attach(region.base, region.len)? }.capacity();
        Ok(region)
    }

    /// Anonymous shared mapping holding an empty table of `capacity` records.
    pub fn anonymous(capacity: usize) -> Result<Self, TableError> {
        if capacity == 0 || u32::try_from(capacity).is_err() {
            return Err(TableError::InvalidCapacity(capacity));
        }
        let len = CoverageTable::region_len(capacity);
        let base = map_shared(None, len)?;
        let region = Self {
            base,
            len,
            capacity,
            path: None,
        };
        // SAFETY: fresh zero-filled anonymous mapping.
        unsafe { CoverageTable::format(region.base, region.len, capacity)? };
        Ok(region)
    }

    /// Handle on the table stored in this region.
    ///
    /// The header is validated once, on construction. Later writes to the
    /// header (a target scribbling over its own mapping) do not change the
    /// capacity the handle was built with.
    #[must_use]
    pub fn table(&self) -> CoverageTable<'_> {
        // SAFETY: construction checked that `len` covers `capacity` slots, and the
        // mapping stays alive for the lifetime of the borrow.
        unsafe { CoverageTable::from_parts(self.base, self.capacity) }
    }

    /// Backing file, for file-backed regions.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Mapping length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe a mapping created by `map_shared`.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

fn map_shared(file: Option<&File>, len: usize) -> Result<NonNull<u8>, TableError> {
    let (flags, fd) = match file {
        Some(file) => (libc::MAP_SHARED, file.as_raw_fd()),
        None => (libc::MAP_SHARED | libc::MAP_ANONYMOUS, -1),
    };
    // SAFETY: requesting a fresh mapping; the kernel validates fd and length.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(TableError::Map(io::Error::last_os_error()));
    }
    NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| TableError::Map(io::Error::other("mmap returned null")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteId;

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("failonce-region-{name}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn create_sizes_the_file() {
        let path = scratch_path("size");
        let region = SharedRegion::create(&path, 16).expect("create");
        let on_disk = std::fs::metadata(&path).expect("metadata").len();
        assert_eq!(on_disk as usize, CoverageTable::region_len(16));
        assert_eq!(region.table().capacity(), 16);
        assert_eq!(region.path(), Some(path.as_path()));
        drop(region);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_sees_records_written_through_create() {
        let path = scratch_path("reopen");
        let writer = SharedRegion::create(&path, 8).expect("create");
        let site = writer
            .table()
            .lookup_or_create(SiteId::tagged("shared"))
            .expect("insert");
        assert!(site.claim_failure());

        let reader = SharedRegion::open(&path).expect("open");
        let snap = reader.table().snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap.records[0].has_failed);

        // Writes through the second mapping are visible through the first.
        reader
            .table()
            .lookup_or_create(SiteId::tagged("shared"))
            .expect("lookup")
            .mark_succeeded();
        assert!(writer.table().snapshot().records[0].has_succeeded);

        drop(reader);
        drop(writer);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_rejects_foreign_files() {
        let path = scratch_path("foreign");
        std::fs::write(&path, vec![0xAAu8; 4096]).expect("write");
        let err = SharedRegion::open(&path).expect_err("not a table");
        assert!(matches!(err, TableError::BadMagic { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_rejects_truncated_tables() {
        let path = scratch_path("truncated");
        drop(SharedRegion::create(&path, 64).expect("create"));
        let file = OpenOptions::new().write(true).open(&path).expect("open rw");
        file.set_len(CoverageTable::region_len(8) as u64).expect("shrink");
        drop(file);
        let err = SharedRegion::open(&path).expect_err("too small");
        assert!(matches!(err, TableError::RegionTooSmall { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn handle_survives_a_clobbered_header() {
        use std::os::unix::fs::FileExt;

        let path = scratch_path("clobber");
        let region = SharedRegion::create(&path, 8).expect("create");
        region
            .table()
            .lookup_or_create(SiteId::tagged("before"))
            .expect("insert");

        // Overwrite the magic through the file; the shared mapping sees it.
        let file = OpenOptions::new().write(true).open(&path).expect("open rw");
        file.write_all_at(&[0u8; 8], 0).expect("clobber magic");
        drop(file);

        let table = region.table();
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.len(), 1);
        assert!(matches!(
            SharedRegion::open(&path),
            Err(TableError::BadMagic { .. })
        ));
        drop(region);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = SharedRegion::open(&scratch_path("missing")).expect_err("missing");
        assert!(matches!(err, TableError::Io(_)));
    }
}
