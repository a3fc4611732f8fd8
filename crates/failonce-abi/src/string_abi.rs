//! Allocating string duplication (`strdup`, `strndup`).
//!
//! Interposed directly rather than left to libc: libc's copies would allocate
//! from inside libc, collapsing every `strdup` caller into one call site.

use std::ffi::c_char;

use failonce_core::Decision;

use crate::malloc_abi::intercept;
use crate::native;
use crate::util::{scan_c_string, set_errno};

unsafe fn duplicate(src: *const c_char, bound: Option<usize>) -> *mut c_char {
    if intercept() == Decision::Fail {
        set_errno(libc::ENOMEM);
        return std::ptr::null_mut();
    }
    // SAFETY: caller passes a readable C string (bounded for strndup).
    let (len, _) = unsafe { scan_c_string(src, bound) };
    // SAFETY: forwarding to the real allocator.
    let dst = unsafe { native::malloc(len + 1) }.cast::<c_char>();
    if dst.is_null() {
        return dst;
    }
    // SAFETY: `dst` has len + 1 bytes; `src` has at least `len` readable bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(src, dst, len);
        *dst.add(len) = 0;
    }
    dst
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn strdup(s: *const c_char) -> *mut c_char {
    // SAFETY: same contract as libc strdup.
    unsafe { duplicate(s, None) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn strndup(s: *const c_char, n: usize) -> *mut c_char {
    // SAFETY: same contract as libc strndup.
    unsafe { duplicate(s, Some(n)) }
}
