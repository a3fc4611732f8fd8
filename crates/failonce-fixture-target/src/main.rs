//! Fixture target for failonce end-to-end tests.
//!
//! Calls the C allocator directly from a handful of fixed call sites and reacts
//! to failure according to the mode given as the first argument:
//!
//! - `exit-on-null`: one site; exit with status 2 when it fails.
//! - `retry`: one `malloc` and one `strdup` site, each retried until it succeeds.
//! - `abort-on-null`: three sites, each checked before the next is reached;
//!   abort (and dump core) when one of them fails.
//! - `page-aligned`: one `valloc` site; exit with status 2 when it fails.
//!
//! There is no Rust runtime entry (`#![no_main]`), so the only allocations
//! before `main` are the C runtime's own.

#![no_main]

use std::ffi::{c_char, c_int, c_void};

const EXIT_ON_NULL_STATUS: c_int = 2;

unsafe extern "C" {
    fn valloc(size: usize) -> *mut c_void;
}

#[unsafe(no_mangle)]
pub extern "C" fn main(argc: c_int, argv: *const *const c_char) -> c_int {
    let mode = if argc > 1 {
        // SAFETY: argv holds argc valid C strings.
        unsafe { std::ffi::CStr::from_ptr(*argv.add(1)) }.to_bytes()
    } else {
        b"exit-on-null"
    };
    match mode {
        b"exit-on-null" => exit_on_null(),
        b"retry" => retry(),
        b"abort-on-null" => abort_on_null(),
        b"page-aligned" => page_aligned(),
        _ => {
            say(b"failonce-fixture: unknown mode\n");
            64
        }
    }
}

fn exit_on_null() -> c_int {
    let block = site_a(64);
    if block.is_null() {
        say(b"fixture: allocation failed, giving up\n");
        return EXIT_ON_NULL_STATUS;
    }
    release(block);
    say(b"fixture: allocation succeeded\n");
    0
}

fn retry() -> c_int {
    let block = loop {
        let block = site_a(128);
        if !block.is_null() {
            break block;
        }
        say(b"fixture: malloc failed, retrying\n");
    };
    let copy = loop {
        let copy = site_dup(c"failonce");
        if !copy.is_null() {
            break copy;
        }
        say(b"fixture: strdup failed, retrying\n");
    };
    release(copy.cast());
    release(block);
    0
}

fn abort_on_null() -> c_int {
    let a = or_abort(site_a(16));
    let b = or_abort(site_b(32));
    let c = or_abort(site_c(48));
    for block in [a, b, c] {
        release(block);
    }
    0
}

fn or_abort(block: *mut c_void) -> *mut c_void {
    if block.is_null() {
        say(b"fixture: allocation failed, aborting\n");
        // SAFETY: terminating the process.
        unsafe { libc::abort() };
    }
    block
}

fn page_aligned() -> c_int {
    let block = site_page(4096);
    if block.is_null() {
        say(b"fixture: valloc failed, giving up\n");
        return EXIT_ON_NULL_STATUS;
    }
    release(block);
    0
}

// One function per call site, never inlined, so each has one stable return address.

#[inline(never)]
fn site_a(size: usize) -> *mut c_void {
    // SAFETY: plain allocation.
    unsafe { libc::malloc(size) }
}

#[inline(never)]
fn site_b(size: usize) -> *mut c_void {
    // SAFETY: plain allocation.
    unsafe { libc::calloc(1, size) }
}

#[inline(never)]
fn site_c(size: usize) -> *mut c_void {
    // SAFETY: growing a null pointer allocates.
    unsafe { libc::realloc(std::ptr::null_mut(), size) }
}

#[inline(never)]
fn site_page(size: usize) -> *mut c_void {
    // SAFETY: plain page-aligned allocation.
    unsafe { valloc(size) }
}

#[inline(never)]
fn site_dup(s: &std::ffi::CStr) -> *mut c_char {
    // SAFETY: `s` is NUL terminated.
    unsafe { libc::strdup(s.as_ptr()) }
}

fn release(block: *mut c_void) {
    // SAFETY: `block` came from the C allocator.
    unsafe { libc::free(block) };
}

fn say(msg: &[u8]) {
    // SAFETY: writing a valid buffer to stderr.
    unsafe { libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len()) };
}
