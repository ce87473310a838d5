//! Decoded child status
//!
//! A killed child is reported as [`ExitOutcome::Signaled`] with the signal
//! itself, never folded into the exit code range. [`ExitOutcome::shell_status`]
//! gives the `128 + signal` number shells print, for reporters that expect it.

use std::fmt;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Result of one non-blocking status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitOutcome {
    /// Still running (or merely stopped/continued)
    Running,
    /// Exited normally with this status
    Exited(u8),
    /// Terminated by this signal
    Signaled(Signal),
}

impl ExitOutcome {
    pub(crate) fn from_wait_status(status: WaitStatus) -> Self {
        match status {
            // Only the low 8 bits of an exit status survive
            WaitStatus::Exited(_, code) => ExitOutcome::Exited(code as u8),
            WaitStatus::Signaled(_, sig, _) => ExitOutcome::Signaled(sig),
            _ => ExitOutcome::Running,
        }
    }

    /// Whether the process is gone (and has been reaped)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExitOutcome::Running)
    }

    pub fn code(&self) -> Option<u8> {
        match self {
            ExitOutcome::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            ExitOutcome::Signaled(sig) => Some(*sig),
            _ => None,
        }
    }

    /// Status in the shell convention: exit code, or `128 + signal`
    pub fn shell_status(&self) -> Option<i32> {
        match self {
            ExitOutcome::Running => None,
            ExitOutcome::Exited(code) => Some(i32::from(*code)),
            ExitOutcome::Signaled(sig) => Some(128 + *sig as i32),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Running => write!(f, "running"),
            ExitOutcome::Exited(code) => write!(f, "exited with status {}", code),
            ExitOutcome::Signaled(sig) => write!(f, "killed by {}", sig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_from_wait_status() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::StillAlive),
            ExitOutcome::Running
        );
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Exited(pid, 127)),
            ExitOutcome::Exited(127)
        );
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            ExitOutcome::Signaled(Signal::SIGKILL)
        );
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            ExitOutcome::Running
        );
    }

    #[test]
    fn test_shell_status() {
        assert_eq!(ExitOutcome::Running.shell_status(), None);
        assert_eq!(ExitOutcome::Exited(0).shell_status(), Some(0));
        assert_eq!(ExitOutcome::Exited(3).shell_status(), Some(3));
        assert_eq!(
            ExitOutcome::Signaled(Signal::SIGKILL).shell_status(),
            Some(137)
        );
        assert_eq!(
            ExitOutcome::Signaled(Signal::SIGTERM).shell_status(),
            Some(143)
        );
    }

    #[test]
    fn test_structured_parts_do_not_overlap() {
        let exited = ExitOutcome::Exited(137);
        let killed = ExitOutcome::Signaled(Signal::SIGKILL);
        assert_eq!(exited.shell_status(), killed.shell_status());
        assert_ne!(exited, killed);
        assert_eq!(exited.signal(), None);
        assert_eq!(killed.code(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitOutcome::Exited(1).to_string(), "exited with status 1");
        assert_eq!(
            ExitOutcome::Signaled(Signal::SIGTERM).to_string(),
            "killed by SIGTERM"
        );
    }
}
