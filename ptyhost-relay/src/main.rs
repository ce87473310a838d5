//! ptyhost relay
//!
//! Runs a shell in a supervised PTY and relays this terminal to it:
//! stdin goes to the shell, its output comes back to stdout, and size
//! changes of this terminal are forwarded.

mod config;

use std::error::Error;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::time::Duration;

use clap::Parser;
use polling::{Event, Events, Poller};
use ptyhost_mux::{SessionId, Supervisor, SupervisorEvent};
use ptyhost_pty::{pty, Geometry};

use crate::config::{CliArgs, Config};

/// How long the supervisor waits per loop turn
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the shell gets to exit once stdin is gone
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = CliArgs::parse();
    let config = Config::load_with_args(&args)?;
    log::debug!("Loaded config: {:?}", config);

    let code = {
        let raw_guard = if nix::unistd::isatty(io::stdin().as_raw_fd()).unwrap_or(false) {
            Some(RawModeGuard::new()?)
        } else {
            None
        };
        let code = relay(&config)?;
        drop(raw_guard);
        code
    };

    std::process::exit(code)
}

/// Run the session to completion and return the shell's exit status
fn relay(config: &Config) -> Result<i32, Box<dyn Error>> {
    let (cols, rows) = config.dimensions;
    let mut geometry = terminal_geometry().unwrap_or(Geometry::new(rows, cols));

    let mut supervisor = Supervisor::new(config.supervisor_config())?;
    let id = supervisor.spawn(geometry)?;
    log::info!("Relaying to session {} ({})", id, geometry);

    let stdin = io::stdin();
    let stdin_poller = Poller::new()?;
    // SAFETY: stdin outlives the poller
    unsafe { stdin_poller.add(stdin.as_raw_fd(), Event::readable(0))? };

    let mut events = Events::new();
    let mut stdin_buf = [0u8; 4096];
    let mut stdout = io::stdout();

    loop {
        for event in supervisor.poll(Some(POLL_INTERVAL))? {
            if let Some(code) = handle_event(&mut stdout, id, event)? {
                return Ok(code);
            }
        }

        if let Some(current) = terminal_geometry() {
            if current != geometry {
                geometry = current;
                if let Err(e) = supervisor.resize(id, geometry) {
                    log::warn!("Failed to resize session {}: {}", id, e);
                }
            }
        }

        events.clear();
        stdin_poller.wait(&mut events, Some(Duration::ZERO))?;
        if events.is_empty() {
            continue;
        }

        let n = stdin.lock().read(&mut stdin_buf)?;
        if n == 0 {
            log::debug!("stdin closed; shutting down session {}", id);
            return shutdown(&mut supervisor, &mut stdout, id);
        }
        supervisor.write(id, &stdin_buf[..n])?;
        stdin_poller.modify(&stdin, Event::readable(0))?;
    }
}

/// Forward one supervisor event; returns the exit status once the shell is gone
fn handle_event(
    stdout: &mut io::Stdout,
    id: SessionId,
    event: SupervisorEvent,
) -> Result<Option<i32>, Box<dyn Error>> {
    match event {
        SupervisorEvent::Output { data, .. } => {
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        SupervisorEvent::Eof { .. } => {}
        SupervisorEvent::Exited { id: exited, outcome } if exited == id => {
            eprintln!("\r\n[ptyhost] shell {}", outcome);
            return Ok(Some(outcome.shell_status().unwrap_or(0)));
        }
        SupervisorEvent::Failed { id: failed, error } if failed == id => {
            return Err(error.into());
        }
        other => log::debug!("Ignoring event for session {}", other.id()),
    }
    Ok(None)
}

fn shutdown(
    supervisor: &mut Supervisor,
    stdout: &mut io::Stdout,
    id: SessionId,
) -> Result<i32, Box<dyn Error>> {
    let mut code = 0;
    for event in supervisor.shutdown(SHUTDOWN_GRACE)? {
        if let Some(status) = handle_event(stdout, id, event)? {
            code = status;
        }
    }
    Ok(code)
}

/// Size of the terminal on stdout, if it is one
fn terminal_geometry() -> Option<Geometry> {
    pty::get_window_size(io::stdout().as_raw_fd())
        .ok()
        .filter(|size| size.rows > 0 && size.cols > 0)
}

/// RAII guard for raw terminal mode
struct RawModeGuard {
    original: nix::sys::termios::Termios,
}

impl RawModeGuard {
    fn new() -> io::Result<Self> {
        use nix::sys::termios::{self, SetArg};

        let original = termios::tcgetattr(io::stdin()).map_err(io::Error::from)?;

        // Keystrokes, including ^C, belong to the shell
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);

        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        Ok(Self { original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        use nix::sys::termios::{self, SetArg};
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original);
    }
}
