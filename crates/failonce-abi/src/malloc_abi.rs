//! ABI layer for the allocation primitives (`malloc`, `calloc`, `realloc`,
//! `reallocarray`, `posix_memalign`, `aligned_alloc`, `memalign`, `valloc`,
//! `pvalloc`, `free`).
//!
//! Every allocating entry point asks [`intercept`] first. An injected failure
//! returns the primitive's failure sentinel with `errno` set to `ENOMEM`;
//! otherwise the request goes to the real allocator and its result is
//! returned unmodified.
//!
//! In test mode, this module is suppressed to avoid shadowing the system allocator
//! (which would cause infinite recursion in the test binary itself).

use std::ffi::{c_int, c_void};

use failonce_core::{Decision, decide};

use crate::callsite::caller_site;
use crate::native;
use crate::reentry::enter_allocator_reentry_guard;
use crate::state::{attached_table, ensure_initialized, fatal_table_error, is_disabled};
use crate::util::set_errno;

/// Run the fail-once policy for the allocation being made by our caller.
#[inline(never)]
pub(crate) fn intercept() -> Decision {
    if is_disabled() {
        return Decision::Delegate;
    }
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // The policy itself is allocating.
        return Decision::Delegate;
    };
    ensure_initialized();
    let Some(table) = attached_table() else {
        return Decision::Delegate;
    };
    let Some(site) = caller_site() else {
        return Decision::Delegate;
    };
    match decide(&table, site) {
        Ok(decision) => decision,
        Err(err) => fatal_table_error(&err),
    }
}

#[inline]
fn injected_null() -> *mut c_void {
    set_errno(libc::ENOMEM);
    std::ptr::null_mut()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    match intercept() {
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::malloc(size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match intercept() {
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::calloc(nmemb, size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // realloc(p, 0) releases `p`; it is not an allocation.
    if !ptr.is_null() && size == 0 {
        // SAFETY: forwarding to the real allocator.
        return unsafe { native::realloc(ptr, size) };
    }
    match intercept() {
        // The original block stays valid, as with a genuine realloc failure.
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::realloc(ptr, size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reallocarray(ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        return injected_null();
    };
    // SAFETY: same contract as realloc.
    unsafe { realloc(ptr, total) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    if !alignment.is_power_of_two() || alignment % std::mem::size_of::<*mut c_void>() != 0 {
        return libc::EINVAL;
    }
    match intercept() {
        // posix_memalign reports through its return value and leaves *memptr alone.
        Decision::Fail => libc::ENOMEM,
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::posix_memalign(memptr, alignment, size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    match intercept() {
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::aligned_alloc(alignment, size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    match intercept() {
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::memalign(alignment, size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    match intercept() {
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::valloc(size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    match intercept() {
        Decision::Fail => injected_null(),
        // SAFETY: forwarding to the real allocator.
        Decision::Delegate => unsafe { native::pvalloc(size) },
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    // SAFETY: forwarding to the real allocator; bootstrap blocks are ignored there.
    unsafe { native::free(ptr) }
}
