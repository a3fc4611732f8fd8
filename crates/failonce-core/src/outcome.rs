//! Run outcomes and termination classification.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// How one run of the target program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// Normal exit with a status code (zero or not).
    Exited { code: i32 },
    /// Killed by a signal.
    Signaled { signal: i32, core_dumped: bool },
    /// The driver killed the run after its wait timeout expired.
    TimedOut,
}

impl Termination {
    /// Classify a wait status. `None` means the status is neither an exit nor a
    /// termination signal (for example a stop), which callers treat as fatal.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Option<Self> {
        if let Some(code) = status.code() {
            return Some(Self::Exited { code });
        }
        status.signal().map(|signal| Self::Signaled {
            signal,
            core_dumped: status.core_dumped(),
        })
    }

    /// Runs that may have left a crash artifact behind.
    #[must_use]
    pub const fn is_crash(&self) -> bool {
        matches!(self, Self::Signaled { .. } | Self::TimedOut)
    }

    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        match self {
            Self::Signaled { signal, .. } => Some(*signal),
            _ => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with status {code}"),
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "terminated with signal {} ({signal})", signal_name(*signal))?;
                if *core_dumped {
                    f.write_str(", core dumped")?;
                }
                Ok(())
            }
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// One completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// 1-based run counter.
    pub run_index: u64,
    pub termination: Termination,
}

/// Symbolic name of a signal number, `"SIG?"` for unknown values.
#[must_use]
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGSYS => "SIGSYS",
        _ => "SIG?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_classifies_as_exited() {
        let t = Termination::from_status(ExitStatus::from_raw(2 << 8)).expect("classifiable");
        assert_eq!(t, Termination::Exited { code: 2 });
        assert!(!t.is_crash());
        assert_eq!(t.exit_code(), Some(2));
    }

    #[test]
    fn signal_status_classifies_as_signaled() {
        let t = Termination::from_status(ExitStatus::from_raw(libc::SIGSEGV)).expect("classifiable");
        assert_eq!(
            t,
            Termination::Signaled {
                signal: libc::SIGSEGV,
                core_dumped: false
            }
        );
        assert!(t.is_crash());
        assert_eq!(t.signal(), Some(libc::SIGSEGV));
    }

    #[test]
    fn core_dump_bit_is_kept() {
        let t = Termination::from_status(ExitStatus::from_raw(libc::SIGABRT | 0x80))
            .expect("classifiable");
        assert_eq!(
            t,
            Termination::Signaled {
                signal: libc::SIGABRT,
                core_dumped: true
            }
        );
        assert_eq!(
            t.to_string(),
            "terminated with signal SIGABRT (6), core dumped"
        );
    }

    #[test]
    fn stopped_status_is_unclassifiable() {
        // WIFSTOPPED: low byte 0x7f, stop signal in the next byte.
        assert!(Termination::from_status(ExitStatus::from_raw(0x137f)).is_none());
    }

    #[test]
    fn timeout_counts_as_crash() {
        assert!(Termination::TimedOut.is_crash());
        assert_eq!(Termination::TimedOut.to_string(), "timed out");
    }

    #[test]
    fn display_matches_progress_lines() {
        assert_eq!(
            Termination::Exited { code: 0 }.to_string(),
            "exited with status 0"
        );
        assert_eq!(
            Termination::Signaled {
                signal: libc::SIGSEGV,
                core_dumped: false
            }
            .to_string(),
            "terminated with signal SIGSEGV (11)"
        );
    }

    #[test]
    fn unknown_signal_name() {
        assert_eq!(signal_name(200), "SIG?");
    }
}
