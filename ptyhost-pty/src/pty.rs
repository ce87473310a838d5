//! PTY (pseudoterminal) device pair allocation
//!
//! The master is opened with `posix_openpt()`, then `grantpt()`/`unlockpt()`
//! make the slave usable and `ptsname()` names it. The slave is opened here
//! too and held until the child has forked, so the master never observes a
//! hangup in the window before the child attaches. The parent drops its
//! slave descriptor right after `fork()` and then sees end-of-stream once
//! the child side is gone.
//!
//! Reference: https://www.man7.org/linux/man-pages/man3/posix_openpt.3.html

use std::ffi::{CStr, CString};
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt};

use crate::error::{PtyError, Result};
use crate::size::Geometry;

/// A freshly allocated master/slave pair, not yet attached to a process
pub struct Pty {
    /// The PTY master
    master: File,
    /// The PTY slave, inherited by the child
    slave: OwnedFd,
    /// Path to the slave PTY
    slave_path: CString,
}

impl Pty {
    /// Allocate a new device pair
    pub fn open() -> Result<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenMaster)?;
        grantpt(&master).map_err(PtyError::GrantPty)?;
        unlockpt(&master).map_err(PtyError::UnlockPty)?;

        // SAFETY: ptsname() uses a static buffer; the name is copied out
        // before anything else can call it on this thread
        let name = unsafe { ptsname(&master) }.map_err(PtyError::PtsName)?;
        let slave_path =
            CString::new(name).map_err(|e| PtyError::InvalidArgument(e.to_string()))?;

        // SAFETY: into_raw_fd() hands over sole ownership of the descriptor
        let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };

        // Other sessions' children must not inherit this master, or closing
        // it here would never hang up the slave
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(PtyError::OpenMaster)?;

        let slave = open_slave(&slave_path)?;

        log::trace!("Allocated PTY pair, slave {:?}", slave_path);
        Ok(Self {
            master,
            slave,
            slave_path,
        })
    }

    pub fn slave_path(&self) -> &CStr {
        &self.slave_path
    }

    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    pub fn slave_fd(&self) -> RawFd {
        self.slave.as_raw_fd()
    }

    /// Hand over the master once the child is running, closing our copy
    /// of the slave
    pub(crate) fn into_master(self) -> File {
        drop(self.slave);
        self.master
    }
}

impl AsRawFd for Pty {
    fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

/// Open the slave side without making it our controlling terminal
fn open_slave(path: &CStr) -> Result<OwnedFd> {
    // SAFETY: `path` is a valid NUL-terminated string
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC,
        )
    };
    let fd = Errno::result(fd).map_err(PtyError::OpenSlave)?;
    // SAFETY: open() just returned this descriptor to us
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Set the window size on a PTY file descriptor
///
/// On the master this makes the kernel send `SIGWINCH` to the terminal's
/// foreground process group.
pub fn set_window_size(fd: RawFd, size: Geometry) -> std::result::Result<(), Errno> {
    let ws = size.to_winsize();
    // SAFETY: TIOCSWINSZ reads a winsize struct that outlives the call
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &ws) };
    Errno::result(result).map(drop)
}

/// Get the window size from a PTY file descriptor
pub fn get_window_size(fd: RawFd) -> std::result::Result<Geometry, Errno> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ writes into a winsize struct we own
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as _, &mut ws) };
    Errno::result(result).map(|_| Geometry::from(ws))
}

/// Toggle `O_NONBLOCK` on a descriptor
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> std::result::Result<(), Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    let new_flags = if nonblocking {
        flags | OFlag::O_NONBLOCK
    } else {
        flags & !OFlag::O_NONBLOCK
    };
    fcntl(fd, FcntlArg::F_SETFL(new_flags))?;
    Ok(())
}

/// Whether `O_NONBLOCK` is set on a descriptor
pub fn is_nonblocking(fd: RawFd) -> std::result::Result<bool, Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    Ok(flags.contains(OFlag::O_NONBLOCK))
}
