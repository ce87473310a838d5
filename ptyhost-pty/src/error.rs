//! Error types for PTY operations

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// PTY error type
///
/// Every variant that wraps an OS failure keeps the underlying [`Errno`], so
/// callers can log the raw code or pack it with [`crate::compat`].
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] Errno),

    #[error("Failed to grant PTY access: {0}")]
    GrantPty(#[source] Errno),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPty(#[source] Errno),

    #[error("Failed to get PTY slave name: {0}")]
    PtsName(#[source] Errno),

    #[error("Failed to open PTY slave: {0}")]
    OpenSlave(#[source] Errno),

    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] Errno),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] Errno),

    #[error("Failed to set window size: {0}")]
    Resize(#[source] Errno),

    #[error("Failed to set non-blocking mode: {0}")]
    SetNonBlocking(#[source] Errno),

    #[error("Failed to close PTY master: {0}")]
    Close(#[source] Errno),

    #[error("Failed to signal child: {0}")]
    Signal(#[source] Errno),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] Errno),

    #[error("Failed to poll PTY: {0}")]
    Poll(#[source] Errno),

    /// No data (or no buffer space) right now; retry later
    #[error("Operation would block")]
    WouldBlock,

    /// The controlling handle has already been closed
    #[error("PTY master is closed")]
    Closed,

    /// The child has been reaped; its geometry can no longer be changed
    #[error("Child process has exited")]
    Exited,

    /// The child has been reaped; its pid may since have been recycled
    #[error("Child process was already reaped")]
    AlreadyReaped,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of a [`PtyError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The OS ran out of PTYs, processes, descriptors or memory
    ResourceExhaustion,
    /// The caller may not act on the target
    PermissionDenied,
    /// Closed, reaped or never-valid handle or process id
    InvalidHandle,
    /// Retryable; not a failure
    WouldBlock,
    Other,
}

impl PtyError {
    /// The underlying OS error number, if there is one
    pub fn errno(&self) -> Option<Errno> {
        match self {
            PtyError::OpenMaster(e)
            | PtyError::GrantPty(e)
            | PtyError::UnlockPty(e)
            | PtyError::PtsName(e)
            | PtyError::OpenSlave(e)
            | PtyError::Fork(e)
            | PtyError::Read(e)
            | PtyError::Write(e)
            | PtyError::Resize(e)
            | PtyError::SetNonBlocking(e)
            | PtyError::Close(e)
            | PtyError::Signal(e)
            | PtyError::Wait(e)
            | PtyError::Poll(e) => Some(*e),
            PtyError::WouldBlock => Some(Errno::EAGAIN),
            PtyError::Io(e) => e.raw_os_error().map(Errno::from_raw),
            PtyError::InvalidArgument(_)
            | PtyError::Closed
            | PtyError::Exited
            | PtyError::AlreadyReaped => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PtyError::WouldBlock => return ErrorKind::WouldBlock,
            PtyError::Closed | PtyError::Exited | PtyError::AlreadyReaped => {
                return ErrorKind::InvalidHandle
            }
            _ => {}
        }

        match self.errno() {
            // fork() reports a full process table as EAGAIN
            Some(Errno::EAGAIN) if matches!(self, PtyError::Fork(_)) => {
                ErrorKind::ResourceExhaustion
            }
            Some(Errno::EAGAIN) => ErrorKind::WouldBlock,
            Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM | Errno::ENOSPC) => {
                ErrorKind::ResourceExhaustion
            }
            Some(Errno::EPERM | Errno::EACCES) => ErrorKind::PermissionDenied,
            Some(Errno::EBADF | Errno::ESRCH | Errno::ECHILD) => ErrorKind::InvalidHandle,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_would_block(&self) -> bool {
        self.kind() == ErrorKind::WouldBlock
    }
}

/// Result type for PTY operations
pub type Result<T> = std::result::Result<T, PtyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_is_not_a_failure_kind() {
        assert_eq!(PtyError::WouldBlock.kind(), ErrorKind::WouldBlock);
        assert!(PtyError::WouldBlock.is_would_block());
        assert!(!PtyError::Closed.is_would_block());
    }

    #[test]
    fn test_fork_eagain_is_exhaustion() {
        assert_eq!(
            PtyError::Fork(Errno::EAGAIN).kind(),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(
            PtyError::OpenMaster(Errno::ENFILE).kind(),
            ErrorKind::ResourceExhaustion
        );
    }

    #[test]
    fn test_invalid_handle_kinds() {
        assert_eq!(PtyError::Closed.kind(), ErrorKind::InvalidHandle);
        assert_eq!(PtyError::AlreadyReaped.kind(), ErrorKind::InvalidHandle);
        assert_eq!(PtyError::Exited.kind(), ErrorKind::InvalidHandle);
        assert_eq!(
            PtyError::Signal(Errno::ESRCH).kind(),
            ErrorKind::InvalidHandle
        );
    }

    #[test]
    fn test_permission_denied() {
        assert_eq!(
            PtyError::Signal(Errno::EPERM).kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_io_errno_is_preserved() {
        let err = PtyError::from(io::Error::from_raw_os_error(libc::EIO));
        assert_eq!(err.errno(), Some(Errno::EIO));
        assert_eq!(PtyError::Closed.errno(), None);
    }
}
