//! The real allocator behind the shim.
//!
//! The shim exports `malloc` and friends itself, so calling `libc::malloc` from
//! here would recurse into the shim. The next definitions in lookup order are
//! found with `dlsym(RTLD_NEXT, ...)` instead.
//!
//! `dlsym` may allocate while it runs (glibc uses `calloc` for its error
//! buffer). Requests that arrive before resolution finishes are served from a
//! small static bootstrap arena. Bootstrap blocks are never reused, so they are
//! always zero-filled, and `free` ignores them.

use std::cell::UnsafeCell;
use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> c_int;
type AlignedAllocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;

static REAL_MALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_CALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_REALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_FREE: AtomicUsize = AtomicUsize::new(0);
static REAL_POSIX_MEMALIGN: AtomicUsize = AtomicUsize::new(0);
static REAL_ALIGNED_ALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_MEMALIGN: AtomicUsize = AtomicUsize::new(0);
static REAL_VALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_PVALLOC: AtomicUsize = AtomicUsize::new(0);

/// Resolve the real allocator entry points.
///
/// Terminates the process when any of `malloc`, `calloc`, `realloc` or `free`
/// is missing: nothing can be delegated without them.
pub fn resolve_real_functions() {
    let required = [
        (&REAL_MALLOC, c"malloc"),
        (&REAL_CALLOC, c"calloc"),
        (&REAL_REALLOC, c"realloc"),
        (&REAL_FREE, c"free"),
    ];
    for (slot, name) in required {
        // SAFETY: RTLD_NEXT lookup of a NUL-terminated symbol name.
        let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
        if sym.is_null() {
            crate::util::fatal(b"failonce: unable to find the system allocator\n");
        }
        slot.store(sym as usize, Ordering::Release);
    }

    let optional = [
        (&REAL_POSIX_MEMALIGN, c"posix_memalign"),
        (&REAL_ALIGNED_ALLOC, c"aligned_alloc"),
        (&REAL_MEMALIGN, c"memalign"),
        (&REAL_VALLOC, c"valloc"),
        (&REAL_PVALLOC, c"pvalloc"),
    ];
    for (slot, name) in optional {
        // SAFETY: as above.
        let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
        slot.store(sym as usize, Ordering::Release);
    }
}

macro_rules! real_fn {
    ($slot:ident, $ty:ty) => {{
        let addr = $slot.load(Ordering::Acquire);
        // SAFETY: non-zero values were stored from dlsym for a symbol of this type.
        (addr != 0).then(|| unsafe { std::mem::transmute::<usize, $ty>(addr) })
    }};
}

pub unsafe fn malloc(size: usize) -> *mut c_void {
    match real_fn!(REAL_MALLOC, MallocFn) {
        Some(f) => unsafe { f(size) },
        None => bootstrap_alloc(size),
    }
}

pub unsafe fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match real_fn!(REAL_CALLOC, CallocFn) {
        Some(f) => unsafe { f(nmemb, size) },
        None => match nmemb.checked_mul(size) {
            Some(total) => bootstrap_alloc(total),
            None => ptr::null_mut(),
        },
    }
}

pub unsafe fn realloc(old: *mut c_void, size: usize) -> *mut c_void {
    if is_bootstrap(old) {
        // Move the block out of the arena; the arena copy is simply abandoned.
        let fresh = unsafe { malloc(size) };
        if !fresh.is_null() {
            let keep = bootstrap_size(old).min(size);
            unsafe { ptr::copy_nonoverlapping(old.cast::<u8>(), fresh.cast::<u8>(), keep) };
        }
        return fresh;
    }
    match real_fn!(REAL_REALLOC, ReallocFn) {
        Some(f) => unsafe { f(old, size) },
        None if old.is_null() => bootstrap_alloc(size),
        None => ptr::null_mut(),
    }
}

pub unsafe fn free(ptr: *mut c_void) {
    if ptr.is_null() || is_bootstrap(ptr) {
        return;
    }
    if let Some(f) = real_fn!(REAL_FREE, FreeFn) {
        unsafe { f(ptr) };
    }
}

pub unsafe fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
    match real_fn!(REAL_POSIX_MEMALIGN, PosixMemalignFn) {
        Some(f) => unsafe { f(memptr, alignment, size) },
        None => libc::ENOMEM,
    }
}

pub unsafe fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    match real_fn!(REAL_ALIGNED_ALLOC, AlignedAllocFn) {
        Some(f) => unsafe { f(alignment, size) },
        None => ptr::null_mut(),
    }
}

pub unsafe fn memalign(alignment: usize, size: usize) -> *mut c_void {
    match real_fn!(REAL_MEMALIGN, AlignedAllocFn) {
        Some(f) => unsafe { f(alignment, size) },
        None => ptr::null_mut(),
    }
}

pub unsafe fn valloc(size: usize) -> *mut c_void {
    match real_fn!(REAL_VALLOC, MallocFn) {
        Some(f) => unsafe { f(size) },
        None => ptr::null_mut(),
    }
}

pub unsafe fn pvalloc(size: usize) -> *mut c_void {
    match real_fn!(REAL_PVALLOC, MallocFn) {
        Some(f) => unsafe { f(size) },
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// Bootstrap arena
// ---------------------------------------------------------------------------

const BOOTSTRAP_LEN: usize = 64 * 1024;
const BOOTSTRAP_HEADER: usize = 16;

#[repr(C, align(16))]
struct BootstrapArena(UnsafeCell<[u8; BOOTSTRAP_LEN]>);

// SAFETY: disjoint blocks are handed out through an atomic bump cursor.
unsafe impl Sync for BootstrapArena {}

static BOOTSTRAP: BootstrapArena = BootstrapArena(UnsafeCell::new([0; BOOTSTRAP_LEN]));
static BOOTSTRAP_USED: AtomicUsize = AtomicUsize::new(0);

fn bootstrap_base() -> *mut u8 {
    BOOTSTRAP.0.get().cast::<u8>()
}

fn bootstrap_alloc(size: usize) -> *mut c_void {
    let Some(body) = size.checked_add(15).map(|s| s & !15) else {
        return ptr::null_mut();
    };
    let Some(total) = body.checked_add(BOOTSTRAP_HEADER) else {
        return ptr::null_mut();
    };
    let mut offset = BOOTSTRAP_USED.load(Ordering::Relaxed);
    loop {
        let Some(end) = offset.checked_add(total).filter(|&end| end <= BOOTSTRAP_LEN) else {
            return ptr::null_mut();
        };
        match BOOTSTRAP_USED.compare_exchange_weak(offset, end, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(current) => offset = current,
        }
    }
    // SAFETY: [offset, offset + total) is now exclusively ours and inside the arena.
    unsafe {
        let block = bootstrap_base().add(offset);
        block.cast::<usize>().write(size);
        block.add(BOOTSTRAP_HEADER).cast()
    }
}

/// True when `ptr` was handed out by the bootstrap arena.
#[must_use]
pub fn is_bootstrap(ptr: *mut c_void) -> bool {
    let start = bootstrap_base() as usize;
    let addr = ptr as usize;
    addr >= start && addr < start + BOOTSTRAP_LEN
}

fn bootstrap_size(ptr: *mut c_void) -> usize {
    // SAFETY: bootstrap blocks carry their requested size in the header.
    unsafe { ptr.cast::<u8>().sub(BOOTSTRAP_HEADER).cast::<usize>().read() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_blocks_are_aligned_zeroed_and_disjoint() {
        let a = bootstrap_alloc(10);
        let b = bootstrap_alloc(10);
        assert!(!a.is_null() && !b.is_null());
        assert_eq!(a as usize % 16, 0);
        assert_eq!(b as usize % 16, 0);
        assert!(b as usize >= a as usize + 16);
        assert!(is_bootstrap(a) && is_bootstrap(b));
        assert_eq!(bootstrap_size(a), 10);
        let bytes = unsafe { std::slice::from_raw_parts(a.cast::<u8>(), 10) };
        assert!(bytes.iter().all(|&x| x == 0));
    }

    #[test]
    fn oversized_bootstrap_requests_fail() {
        assert!(bootstrap_alloc(BOOTSTRAP_LEN).is_null());
        assert!(bootstrap_alloc(usize::MAX).is_null());
    }

    #[test]
    fn heap_pointers_are_not_bootstrap() {
        let boxed = Box::new(7u64);
        assert!(!is_bootstrap((&*boxed as *const u64).cast_mut().cast()));
        assert!(!is_bootstrap(ptr::null_mut()));
    }

    #[test]
    fn resolution_finds_the_system_allocator() {
        resolve_real_functions();
        assert_ne!(REAL_FREE.load(Ordering::Acquire), 0);
        unsafe {
            let p = malloc(32);
            assert!(!p.is_null());
            assert!(!is_bootstrap(p));
            let q = realloc(p, 64);
            assert!(!q.is_null());
            free(q);
        }
    }

    #[test]
    fn page_aligned_entry_points_delegate() {
        resolve_real_functions();
        // SAFETY: sysconf has no preconditions.
        let page = usize::try_from(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }).expect("page size");
        unsafe {
            let v = valloc(10);
            assert!(!v.is_null());
            assert_eq!(v as usize % page, 0);
            free(v);
            let p = pvalloc(page + 1);
            assert!(!p.is_null());
            assert_eq!(p as usize % page, 0);
            free(p);
        }
    }

    #[test]
    fn realloc_moves_bootstrap_blocks_to_the_heap() {
        resolve_real_functions();
        let old = bootstrap_alloc(4);
        unsafe {
            old.cast::<u8>().copy_from_nonoverlapping([1u8, 2, 3, 4].as_ptr(), 4);
            let moved = realloc(old, 8);
            assert!(!moved.is_null());
            assert!(!is_bootstrap(moved));
            let bytes = std::slice::from_raw_parts(moved.cast::<u8>(), 4);
            assert_eq!(bytes, &[1, 2, 3, 4]);
            free(moved);
            // Freeing a bootstrap block is a no-op.
            free(old);
        }
    }
}
