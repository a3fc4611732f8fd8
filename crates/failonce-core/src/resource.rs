//! Core-dump resource limit.
//!
//! Signaled runs are only useful if they leave a dump behind, so the driver
//! raises `RLIMIT_CORE` before spawning anything. Children inherit the limit.

use std::io;

/// Soft and hard `RLIMIT_CORE` values, `None` meaning unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreLimit {
    pub soft: Option<u64>,
    pub hard: Option<u64>,
}

fn from_rlim(value: libc::rlim_t) -> Option<u64> {
    (value != libc::RLIM_INFINITY).then_some(value as u64)
}

/// Current core-dump limit of this process.
pub fn core_limit() -> io::Result<CoreLimit> {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `lim` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_CORE, &mut lim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(CoreLimit {
        soft: from_rlim(lim.rlim_cur),
        hard: from_rlim(lim.rlim_max),
    })
}

/// Raise the soft core-dump limit to the hard limit. Returns the resulting limit.
pub fn enable_core_dumps() -> io::Result<CoreLimit> {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `lim` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_CORE, &mut lim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if lim.rlim_cur != lim.rlim_max {
        lim.rlim_cur = lim.rlim_max;
        // SAFETY: soft == hard is always an allowed setting.
        if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &lim) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    core_limit()
}
