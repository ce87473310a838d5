//! Integer packing for C-style callers
//!
//! Bridges [`Result`] values to the single-integer convention older
//! reporters expect: non-negative values are data, negative values are
//! `-errno`. Exit status is packed the way shells print it, which has two
//! known blind spots the structured API does not share: a child that exited
//! with status 0 packs to the same 0 as a running one, and `128 + signal`
//! overlaps ordinary exit codes above 128.

use nix::errno::Errno;

use crate::error::{PtyError, Result};
use crate::exit::ExitOutcome;

/// Negative errno for an error
pub fn errno_code(err: &PtyError) -> i32 {
    let errno = match err {
        PtyError::Closed => Errno::EBADF,
        PtyError::AlreadyReaped | PtyError::Exited => Errno::ECHILD,
        PtyError::InvalidArgument(_) => Errno::EINVAL,
        other => other.errno().unwrap_or(Errno::EIO),
    };
    -(errno as i32)
}

/// Byte count, 0 at end of stream, or negative errno
pub fn packed_read(result: &Result<usize>) -> isize {
    match result {
        Ok(n) => *n as isize,
        Err(e) => errno_code(e) as isize,
    }
}

/// 0 on success, or negative errno
pub fn packed_unit(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => errno_code(e),
    }
}

/// 0 while running, exit status, `128 + signal`, or negative errno
pub fn packed_status(result: &Result<ExitOutcome>) -> i32 {
    match result {
        Ok(outcome) => outcome.shell_status().unwrap_or(0),
        Err(e) => errno_code(e),
    }
}
