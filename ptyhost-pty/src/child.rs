//! Child process launch
//!
//! Forks a child that takes the slave side of a [`Pty`] as its controlling
//! terminal and standard streams, then replaces its image with the shell.
//! Everything that allocates is prepared before `fork()`; the child branch
//! only makes async-signal-safe calls and leaves through `execve()` or
//! `_exit()`.

use std::ffi::CString;
use std::ptr;

use nix::libc;
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{self, ForkResult, Pid};

use crate::config::{SpawnConfig, EXIT_COMMAND_NOT_FOUND, EXIT_SETUP_FAILED};
use crate::error::{PtyError, Result};
use crate::pty::{set_window_size, Pty};
use crate::size::Geometry;

/// Everything the child needs, allocated in the parent
struct Launch {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<CString>,
    master_fd: libc::c_int,
    slave_fd: libc::c_int,
}

/// Fork a child attached to `pty` and return its pid
///
/// The child's own failures never come back through here: a missing
/// program shows up later as exit status 127.
pub(crate) fn spawn(pty: &Pty, geometry: Geometry, config: &SpawnConfig) -> Result<Pid> {
    let program = config.program()?;
    let launch = Launch {
        argv: vec![program.clone()],
        program,
        envp: config.envp()?,
        cwd: config.cwd_cstring()?,
        master_fd: pty.master_fd(),
        slave_fd: pty.slave_fd(),
    };

    set_window_size(pty.master_fd(), geometry).map_err(PtyError::Resize)?;

    // Null-terminated pointer arrays for execve; they borrow from `launch`
    let argv = exec_array(&launch.argv);
    let envp = exec_array(&launch.envp);

    // SAFETY: the child branch only calls async-signal-safe functions
    match unsafe { unistd::fork() }.map_err(PtyError::Fork)? {
        ForkResult::Parent { child } => {
            log::debug!(
                "Spawned {:?} as pid {} on {:?} ({})",
                launch.program,
                child,
                pty.slave_path(),
                geometry
            );
            Ok(child)
        }
        ForkResult::Child => exec_child(&launch, &argv, &envp),
    }
}

fn exec_array(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Runs in the forked child; never returns
fn exec_child(
    launch: &Launch,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> ! {
    // SAFETY: plain syscalls on descriptors and buffers prepared before fork
    unsafe {
        libc::close(launch.master_fd);

        // Create new session
        if libc::setsid() < 0 {
            libc::_exit(EXIT_SETUP_FAILED as libc::c_int);
        }

        let slave = launch.slave_fd;

        // Set as controlling terminal
        // Note: On macOS, TIOCSCTTY is u32 but ioctl expects c_ulong
        if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) < 0 {
            libc::_exit(EXIT_SETUP_FAILED as libc::c_int);
        }

        // Duplicate slave to stdin, stdout, stderr
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(slave, target) < 0 {
                libc::_exit(EXIT_SETUP_FAILED as libc::c_int);
            }
        }
        // dup2 clears close-on-exec on the copies; the original goes
        if slave > libc::STDERR_FILENO {
            libc::close(slave);
        }

        if let Some(cwd) = &launch.cwd {
            // Not fatal; the shell starts wherever we are
            libc::chdir(cwd.as_ptr());
        }

        // The shell should not inherit our dispositions
        for sig in [
            Signal::SIGCHLD,
            Signal::SIGHUP,
            Signal::SIGINT,
            Signal::SIGQUIT,
            Signal::SIGTERM,
            Signal::SIGALRM,
            Signal::SIGPIPE,
            Signal::SIGWINCH,
        ] {
            let _ = signal::signal(sig, SigHandler::SigDfl);
        }
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);

        libc::execve(launch.program.as_ptr(), argv.as_ptr(), envp.as_ptr());

        // If execve returns, it failed. _exit skips atexit handlers and
        // stdio buffers inherited from the parent.
        libc::_exit(EXIT_COMMAND_NOT_FOUND as libc::c_int)
    }
}
