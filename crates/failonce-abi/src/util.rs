//! Shared internal utilities for the ABI layer.

use std::ffi::c_char;

/// Scan a C string with an optional hard bound.
///
/// Returns `(len, terminated)` where:
/// - `len` is the byte length before the first NUL or before the bound.
/// - `terminated` indicates whether a NUL byte was observed.
///
/// # Safety
///
/// `ptr` must be valid to read up to the discovered length (and bound when given).
pub unsafe fn scan_c_string(ptr: *const c_char, bound: Option<usize>) -> (usize, bool) {
    match bound {
        Some(limit) => {
            for i in 0..limit {
                if unsafe { *ptr.add(i) } == 0 {
                    return (i, true);
                }
            }
            (limit, false)
        }
        None => {
            let mut i = 0usize;
            while unsafe { *ptr.add(i) } != 0 {
                i += 1;
            }
            (i, true)
        }
    }
}

/// Write `msg` to stderr without allocating.
pub fn diag(msg: &[u8]) {
    let mut rest = msg;
    while !rest.is_empty() {
        // SAFETY: `rest` is a valid readable slice.
        let n = unsafe { libc::write(libc::STDERR_FILENO, rest.as_ptr().cast(), rest.len()) };
        if n <= 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}

/// Report a fatal shim condition and terminate the process immediately.
///
/// `_exit` skips atexit handlers and stdio flushing, none of which may run
/// safely from inside an allocator call.
pub fn fatal(msg: &[u8]) -> ! {
    diag(msg);
    // SAFETY: terminating the process.
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

/// Set the calling thread's `errno`.
#[inline]
pub fn set_errno(value: i32) {
    // SAFETY: `__errno_location` always returns the thread's errno slot.
    unsafe { *libc::__errno_location() = value };
}
