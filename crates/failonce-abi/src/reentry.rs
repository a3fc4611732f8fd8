//! Per-thread reentry guard.
//!
//! While the policy runs (unwinding the stack, resolving symbols, reading the
//! environment, mapping the table) it may itself allocate. Those nested calls
//! must reach the real allocator directly and never touch the table.

use std::cell::Cell;

thread_local! {
    static ALLOCATOR_REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

pub(crate) struct AllocatorReentryGuard;

impl Drop for AllocatorReentryGuard {
    fn drop(&mut self) {
        ALLOCATOR_REENTRY_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

/// Enter the policy on this thread. `None` means the thread is already inside it.
#[inline]
pub(crate) fn enter_allocator_reentry_guard() -> Option<AllocatorReentryGuard> {
    ALLOCATOR_REENTRY_DEPTH.with(|depth| {
        let current = depth.get();
        if current > 0 {
            None
        } else {
            depth.set(current + 1);
            Some(AllocatorReentryGuard)
        }
    })
}
