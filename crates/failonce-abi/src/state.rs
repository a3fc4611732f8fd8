//! Process-wide attachment to the campaign's coverage table.
//!
//! The C allocator ABI carries no context argument, so the attached table is
//! the one piece of global state in the shim. It is set up once and then never
//! changes for the life of the process.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use failonce_core::config::ShimConfig;
use failonce_core::{CoverageTable, SharedRegion, TableError};

use crate::util::{diag, fatal};

// Attachment lifecycle states.
const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_DISABLED: u8 = 3;

// UNINIT -> INITIALIZING -> READY | DISABLED. A thread that observes
// INITIALIZING passes straight through instead of waiting: waiting would
// deadlock when the initializing thread itself reenters.
static INIT_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
// Handle built once from the leaked region; never re-read from the header.
static TABLE: OnceLock<CoverageTable<'static>> = OnceLock::new();

/// Resolve the real allocator and attach to the table named in the environment.
///
/// Must be called with the reentry guard held: everything in here may allocate.
pub fn ensure_initialized() {
    if INIT_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return;
    }

    crate::native::resolve_real_functions();
    crate::callsite::prime();

    let config = ShimConfig::from_env();
    let Some(path) = config.table_path else {
        INIT_STATE.store(STATE_DISABLED, Ordering::Release);
        return;
    };

    let region = match SharedRegion::open(&path) {
        Ok(region) => region,
        Err(err) => {
            diag(format!("failonce: cannot attach to {}: {err}\n", path.display()).as_bytes());
            fatal(b"failonce: aborting run\n");
        }
    };
    let region: &'static SharedRegion = Box::leak(Box::new(region));
    let table = *TABLE.get_or_init(|| region.table());
    let attached = table.note_attach();
    INIT_STATE.store(STATE_READY, Ordering::Release);

    if !config.quiet {
        diag(
            format!(
                "failonce: attached to {} (capacity {}, attach #{attached})\n",
                path.display(),
                table.capacity()
            )
            .as_bytes(),
        );
    }
}

/// The attached table, once initialization has finished successfully.
#[must_use]
pub fn attached_table() -> Option<CoverageTable<'static>> {
    if INIT_STATE.load(Ordering::Acquire) != STATE_READY {
        return None;
    }
    TABLE.get().copied()
}

/// True when the environment named no table and the shim is a passthrough.
#[must_use]
pub fn is_disabled() -> bool {
    INIT_STATE.load(Ordering::Acquire) == STATE_DISABLED
}

/// Terminate the run after a table error inside an intercepted call.
pub fn fatal_table_error(err: &TableError) -> ! {
    diag(format!("failonce: {err}\n").as_bytes());
    fatal(b"failonce: aborting run\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_a_table_the_shim_is_a_passthrough() {
        if std::env::var_os(failonce_core::config::TABLE_ENV).is_some() {
            return;
        }
        ensure_initialized();
        assert!(is_disabled());
        assert!(attached_table().is_none());
        // A second call is a no-op.
        ensure_initialized();
        assert!(is_disabled());
    }
}
