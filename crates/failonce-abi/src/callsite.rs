//! Call-site discovery.
//!
//! The call site of an intercepted allocation is the first return address on
//! the stack that lies outside this shared object. It is identified relative
//! to the object containing it (see [`SiteId`]), so the same site maps to the
//! same identity in every run regardless of where the loader placed things.

use std::ffi::{CStr, c_int, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

use failonce_core::SiteId;
use failonce_core::site::module_tag;

const MAX_FRAMES: usize = 32;

unsafe extern "C" {
    fn backtrace(buffer: *mut *mut c_void, size: c_int) -> c_int;
}

static SHIM_BASE: AtomicUsize = AtomicUsize::new(0);

/// Load base and path of the object containing `addr`.
fn object_of(addr: usize) -> Option<(usize, &'static CStr)> {
    let mut info = std::mem::MaybeUninit::<libc::Dl_info>::zeroed();
    // SAFETY: dladdr only reads `addr` as an address and fills `info`.
    let found = unsafe { libc::dladdr(addr as *const c_void, info.as_mut_ptr()) };
    if found == 0 {
        return None;
    }
    // SAFETY: dladdr returned nonzero, so `info` is initialized.
    let info = unsafe { info.assume_init() };
    if info.dli_fbase.is_null() {
        return None;
    }
    let path = if info.dli_fname.is_null() {
        c""
    } else {
        // SAFETY: the loader keeps object names alive while the object is mapped.
        unsafe { CStr::from_ptr(info.dli_fname) }
    };
    Some((info.dli_fbase as usize, path))
}

/// Record the shim's own load base and warm up the unwinder.
///
/// The first `backtrace` call loads the unwinder and allocates. Doing that here,
/// under the constructor's reentry guard, keeps those allocations out of the table.
pub fn prime() {
    if let Some((base, _)) = object_of(prime as *const () as usize) {
        SHIM_BASE.store(base, Ordering::Release);
    }
    let mut frames = [std::ptr::null_mut::<c_void>(); 4];
    // SAFETY: `frames` has room for the requested number of entries.
    unsafe { backtrace(frames.as_mut_ptr(), frames.len() as c_int) };
}

/// Identity of the code that called into the shim.
#[inline(never)]
pub fn caller_site() -> Option<SiteId> {
    let mut frames = [std::ptr::null_mut::<c_void>(); MAX_FRAMES];
    // SAFETY: `frames` has room for MAX_FRAMES entries.
    let depth = unsafe { backtrace(frames.as_mut_ptr(), MAX_FRAMES as c_int) };
    let depth = usize::try_from(depth).unwrap_or(0).min(MAX_FRAMES);
    let mut addrs = [0usize; MAX_FRAMES];
    for (slot, frame) in addrs.iter_mut().zip(&frames[..depth]) {
        *slot = *frame as usize;
    }
    let own = SHIM_BASE.load(Ordering::Acquire);
    first_foreign_frame(&addrs[..depth], own, |addr| {
        object_of(addr).map(|(base, path)| (base, module_tag(path.to_bytes())))
    })
}

/// Pick the first frame whose object base differs from `own_base`.
///
/// `resolve` maps an address to `(load base, module tag)`. Frames no object
/// claims are foreign by definition and are identified by absolute address.
fn first_foreign_frame<R>(frames: &[usize], own_base: usize, mut resolve: R) -> Option<SiteId>
where
    R: FnMut(usize) -> Option<(usize, u64)>,
{
    frames.iter().copied().filter(|&addr| addr != 0).find_map(|addr| match resolve(addr) {
        Some((base, _)) if base == own_base => None,
        Some((base, tag)) => Some(SiteId::new(tag, addr.wrapping_sub(base) as u64)),
        None => Some(SiteId::unmapped(addr)),
    })
}
