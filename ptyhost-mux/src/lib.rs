//! ptyhost session multiplexer
//!
//! Runs many [`ptyhost_pty::Session`]s from a single thread: one poller
//! watches every master, output is buffered for replay, and exits are
//! reported as events.

mod error;
mod scrollback;
mod supervisor;

pub use error::{MuxError, Result};
pub use scrollback::Scrollback;
pub use supervisor::{SessionId, Supervisor, SupervisorConfig, SupervisorEvent};
