//! PTY sessions
//!
//! A [`Session`] is the master side of a PTY plus the child attached to its
//! slave. Both are released exactly once: the master through
//! [`Session::close`], the child through a [`Session::poll_exit`] that
//! observes its death. Dropping a session releases whatever is left.
//!
//! All operations take `&self`, so a session can be shared between an input
//! path and an output path. The master lives behind an `RwLock`: I/O and
//! resize share it, `close` takes it exclusively and therefore waits for
//! in-flight I/O rather than closing under it. The reap state lives behind
//! a `Mutex` that is held across `waitpid()` and `kill()`, so a pid is never
//! signalled or waited on after it has been reaped.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, RawFd};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

use crate::child;
use crate::config::SpawnConfig;
use crate::error::{PtyError, Result};
use crate::exit::ExitOutcome;
use crate::pty::{self, Pty};
use crate::size::Geometry;

/// Lifecycle state of a session's child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Exited(u8),
    Signaled(Signal),
    /// `waitpid()` failed for good (e.g. someone else reaped the child)
    Failed(Errno),
}

impl SessionState {
    /// Whether the child has been reaped or can no longer be waited on
    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

/// A child process attached to a PTY
pub struct Session {
    /// The PTY master; `None` once closed
    master: RwLock<Option<File>>,
    /// Child process ID
    pid: Pid,
    /// Whether the child has been reaped, and how it ended
    state: Mutex<SessionState>,
}

impl Session {
    /// Allocate a PTY and start the configured shell on it
    ///
    /// Returns a running session, or the error that stopped allocation or
    /// fork; nothing stays allocated on failure. A program that cannot be
    /// executed is not an error here: the child exits with status 127.
    pub fn spawn(geometry: Geometry, config: &SpawnConfig) -> Result<Self> {
        let pty = Pty::open()?;
        let pid = child::spawn(&pty, geometry, config)?;

        Ok(Self {
            master: RwLock::new(Some(pty.into_master())),
            pid,
            state: Mutex::new(SessionState::Running),
        })
    }

    /// Get the child process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Last known state; does not poll
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn is_closed(&self) -> bool {
        self.read_master().is_none()
    }

    /// Raw master descriptor for readiness registration, if still open
    ///
    /// Only valid until [`Session::close`].
    pub fn master_fd(&self) -> Option<RawFd> {
        self.read_master().as_ref().map(|file| file.as_raw_fd())
    }

    /// Read the child's output
    ///
    /// `Ok(0)` means end of stream: every holder of the slave side is gone.
    /// In non-blocking mode an empty master yields [`PtyError::WouldBlock`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let guard = self.read_master();
        let mut file = guard.as_ref().ok_or(PtyError::Closed)?;

        loop {
            match file.read(buf) {
                Ok(n) => {
                    log::trace!("Read {} bytes from pid {}", n, self.pid);
                    return Ok(n);
                }
                Err(e) => match errno_of(&e) {
                    Errno::EINTR => continue,
                    Errno::EAGAIN => return Err(PtyError::WouldBlock),
                    // Linux reports a hung-up slave as EIO rather than EOF
                    Errno::EIO => return Ok(0),
                    errno => return Err(PtyError::Read(errno)),
                },
            }
        }
    }

    /// Write to the child's input; may write fewer bytes than given
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let guard = self.read_master();
        let mut file = guard.as_ref().ok_or(PtyError::Closed)?;

        loop {
            match file.write(data) {
                Ok(n) => return Ok(n),
                Err(e) => match errno_of(&e) {
                    Errno::EINTR => continue,
                    Errno::EAGAIN => return Err(PtyError::WouldBlock),
                    errno => return Err(PtyError::Write(errno)),
                },
            }
        }
    }

    /// Write every byte, waiting for buffer space in non-blocking mode
    pub fn write_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(0) => return Err(PtyError::Write(Errno::EIO)),
                Ok(n) => data = &data[n..],
                Err(PtyError::WouldBlock) => self.wait_writable()?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn wait_writable(&self) -> Result<()> {
        let guard = self.read_master();
        let file = guard.as_ref().ok_or(PtyError::Closed)?;
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(PtyError::Poll(e)),
        }
    }

    /// Set the window size
    ///
    /// The kernel notifies the terminal's foreground process group with
    /// `SIGWINCH`; nothing waits for it to react.
    pub fn resize(&self, geometry: Geometry) -> Result<()> {
        let guard = self.read_master();
        let file = guard.as_ref().ok_or(PtyError::Closed)?;
        if self.state().is_finished() {
            return Err(PtyError::Exited);
        }
        pty::set_window_size(file.as_raw_fd(), geometry).map_err(PtyError::Resize)?;
        log::debug!("Resized pid {} to {}", self.pid, geometry);
        Ok(())
    }

    /// Current window size as the kernel sees it
    pub fn geometry(&self) -> Result<Geometry> {
        let guard = self.read_master();
        let file = guard.as_ref().ok_or(PtyError::Closed)?;
        pty::get_window_size(file.as_raw_fd()).map_err(PtyError::Resize)
    }

    /// Set non-blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let guard = self.read_master();
        let file = guard.as_ref().ok_or(PtyError::Closed)?;
        pty::set_nonblocking(file.as_raw_fd(), nonblocking).map_err(PtyError::SetNonBlocking)
    }

    /// Close the master
    ///
    /// The slave is usually hung up and the shell exits, but that is not
    /// guaranteed; use [`Session::terminate`] to end the child. Waits for
    /// I/O running on other threads to finish first.
    pub fn close(&self) -> Result<()> {
        let file = self
            .master
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(PtyError::Closed)?;

        let fd = file.into_raw_fd();
        // SAFETY: we own `fd` and it is closed exactly once here
        let result = Errno::result(unsafe { libc::close(fd) });
        log::debug!("Closed PTY master of pid {}", self.pid);
        result.map(drop).map_err(PtyError::Close)
    }

    /// Send a signal to the child without reaping it
    ///
    /// Call [`Session::poll_exit`] afterwards to observe the result.
    pub fn terminate(&self, sig: Signal) -> Result<()> {
        let state = self.lock_state();
        if state.is_finished() {
            return Err(PtyError::AlreadyReaped);
        }
        signal::kill(self.pid, sig).map_err(PtyError::Signal)?;
        log::debug!("Sent {} to pid {}", sig, self.pid);
        Ok(())
    }

    /// Check whether the child has exited, without blocking
    ///
    /// A terminal outcome also reaps the child, so it is reported once;
    /// later calls fail with [`PtyError::AlreadyReaped`].
    pub fn poll_exit(&self) -> Result<ExitOutcome> {
        let mut state = self.lock_state();
        if state.is_finished() {
            return Err(PtyError::AlreadyReaped);
        }

        let status = match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => status,
            Err(Errno::EINTR) => return Ok(ExitOutcome::Running),
            Err(e) => {
                *state = SessionState::Failed(e);
                log::warn!("waitpid({}) failed: {}", self.pid, e);
                return Err(PtyError::Wait(e));
            }
        };

        let outcome = ExitOutcome::from_wait_status(status);
        match outcome {
            ExitOutcome::Running => {}
            ExitOutcome::Exited(code) => *state = SessionState::Exited(code),
            ExitOutcome::Signaled(sig) => *state = SessionState::Signaled(sig),
        }
        if outcome.is_terminal() {
            log::debug!("Reaped pid {}: {}", self.pid, outcome);
        }
        Ok(outcome)
    }

    fn read_master(&self) -> RwLockReadGuard<'_, Option<File>> {
        self.master.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let master = self.master.get_mut().unwrap_or_else(|e| e.into_inner());
        drop(master.take());

        let state = *self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if state.is_finished() {
            return;
        }

        // Hang up, and make sure the kernel's record of the child is
        // released even if it takes a while to die
        let pid = self.pid;
        let _ = signal::kill(pid, Signal::SIGHUP);
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) if ExitOutcome::from_wait_status(status).is_terminal() => {}
            Err(_) => {}
            Ok(_) => {
                log::debug!("pid {} still running after drop; reaping in background", pid);
                let spawned = std::thread::Builder::new()
                    .name(format!("ptyhost-reap-{}", pid))
                    .spawn(move || {
                        let _ = waitpid(pid, None);
                    });
                if let Err(e) = spawned {
                    log::warn!("Failed to start reaper for pid {}: {}", pid, e);
                }
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("master_fd", &self.master_fd())
            .field("state", &self.state())
            .finish()
    }
}

fn errno_of(err: &io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Spawn a session of `rows` x `cols`
pub fn spawn(rows: u16, cols: u16, config: &SpawnConfig) -> Result<Session> {
    Session::spawn(Geometry::new(rows, cols), config)
}
