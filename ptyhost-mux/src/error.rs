//! Supervisor error types

use std::io;

use ptyhost_pty::PtyError;
use thiserror::Error;

use crate::supervisor::SessionId;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("poller error: {0}")]
    Io(#[from] io::Error),

    #[error("no session with id {0}")]
    UnknownSession(SessionId),
}

pub type Result<T> = std::result::Result<T, MuxError>;
