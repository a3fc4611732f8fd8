// All extern "C" exports accept raw pointers from C callers exactly as the C
// allocator does; per-function safety docs would restate the C contract.
#![allow(clippy::missing_safety_doc)]
// The exporting modules are compiled out of the test binary, leaving some
// helpers without callers there.
#![cfg_attr(test, allow(dead_code))]
//! # failonce-abi
//!
//! Interposition shim for the failonce harness. Built as a `cdylib`
//! (`libfailonce_abi.so`) and loaded into each run of the target with
//! `LD_PRELOAD`.
//!
//! # Architecture
//!
//! ```text
//! C caller -> malloc (this crate) -> call-site lookup -> fail-once policy
//!                                                          |-> NULL / ENOMEM
//!                                                          '-> real allocator (RTLD_NEXT)
//! ```
//!
//! The constructor attaches to the table named by `FAILONCE_TABLE`. Without it
//! the shim is a transparent passthrough.

mod reentry;

pub mod callsite;
pub mod native;
pub mod state;
pub mod util;

// These modules export #[no_mangle] allocator symbols (malloc, free, strdup, ...)
// that would replace the allocator of the test binary itself.
#[cfg(not(test))]
pub mod malloc_abi;
#[cfg(not(test))]
pub mod startup_abi;
#[cfg(not(test))]
pub mod string_abi;
