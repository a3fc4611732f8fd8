//! Library constructor.
//!
//! Attaches to the coverage table before `main` so the attach is counted even
//! for targets that never allocate, and so the unwinder and environment
//! allocations made during setup happen under the reentry guard.

use crate::reentry::enter_allocator_reentry_guard;
use crate::state::ensure_initialized;

#[used]
#[unsafe(link_section = ".init_array")]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        failonce_init();
    }
    init
};

fn failonce_init() {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        return;
    };
    ensure_initialized();
}
