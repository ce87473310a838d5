//! ptyhost PTY sessions
//!
//! This crate runs a shell on a pseudoterminal and lets a controlling layer
//! talk to it byte for byte, as a person at a terminal would.
//!
//! Key features:
//! - PTY pair allocation and shell launch as one atomic [`Session::spawn`]
//! - Non-blocking reads and writes with would-block as its own error variant
//! - Window size management (TIOCSWINSZ, which raises SIGWINCH)
//! - Non-blocking exit polling that reaps exactly once
//! - Signal delivery for graceful and forced termination
//!
//! Unix only; uses the POSIX PTY APIs.
//!
//! Reference: https://www.man7.org/linux/man-pages/man3/posix_openpt.3.html

mod child;
pub mod compat;
pub mod config;
mod error;
mod exit;
pub mod pty;
mod session;
mod size;

pub use config::SpawnConfig;
pub use error::{ErrorKind, PtyError, Result};
pub use exit::ExitOutcome;
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;
pub use pty::Pty;
pub use session::{spawn, Session, SessionState};
pub use size::Geometry;
