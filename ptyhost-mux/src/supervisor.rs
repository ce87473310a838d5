//! Session supervisor
//!
//! Owns any number of [`Session`]s and drives them from one readiness
//! poller: output is drained into per-session replay buffers and handed
//! back as events, exits are collected with a non-blocking sweep, and
//! sessions that ignore a graceful kill are escalated to `SIGKILL`.
//!
//! Interest is registered in oneshot mode and re-armed only after a read
//! has drained the master to would-block. Input is never written with a
//! blocking call: what the master does not take at once is queued and the
//! session also waits for writability until the queue is empty.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

use polling::{Event, Events, Poller};
use ptyhost_pty::{ExitOutcome, Geometry, PtyError, Session, SessionState, Signal, SpawnConfig};

use crate::error::{MuxError, Result};
use crate::scrollback::Scrollback;

/// Upper bound on any wait while sessions exist, so exits are swept
const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Identifier of a supervised session, unique for the supervisor's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    fn key(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How each session's child is launched
    pub spawn: SpawnConfig,
    /// Bytes of recent output kept per session (0 disables replay)
    pub scrollback_limit: usize,
    /// Size of a single read from a master
    pub read_chunk: usize,
    /// Time a killed session gets to exit before `SIGKILL`
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            spawn: SpawnConfig::default(),
            scrollback_limit: 256 * 1024,
            read_chunk: 64 * 1024,
            kill_grace: Duration::from_millis(100),
        }
    }
}

/// Something that happened to a session during [`Supervisor::poll`]
#[derive(Debug)]
pub enum SupervisorEvent {
    /// The child produced output
    Output { id: SessionId, data: Vec<u8> },
    /// Every holder of the slave side is gone; no more output will follow
    Eof { id: SessionId },
    /// The child was reaped; the session has been removed
    Exited { id: SessionId, outcome: ExitOutcome },
    /// I/O on the session failed and it is no longer watched, or its child
    /// can no longer be waited on and it has been removed
    Failed { id: SessionId, error: PtyError },
}

impl SupervisorEvent {
    pub fn id(&self) -> SessionId {
        match self {
            SupervisorEvent::Output { id, .. }
            | SupervisorEvent::Eof { id }
            | SupervisorEvent::Exited { id, .. }
            | SupervisorEvent::Failed { id, .. } => *id,
        }
    }
}

struct Entry {
    session: Session,
    scrollback: Scrollback,
    /// Input the master has not accepted yet
    pending: Vec<u8>,
    /// Still registered with the poller
    registered: bool,
    /// When a pending graceful kill turns into `SIGKILL`
    kill_deadline: Option<Instant>,
}

/// Drives a set of sessions from one poller
pub struct Supervisor {
    config: SupervisorConfig,
    poller: Poller,
    events: Events,
    sessions: HashMap<SessionId, Entry>,
    next_id: u64,
    read_buf: Vec<u8>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let poller = Poller::new()?;
        let read_buf = vec![0u8; config.read_chunk.max(1)];
        Ok(Self {
            config,
            poller,
            events: Events::new(),
            sessions: HashMap::new(),
            next_id: 1,
            read_buf,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start a new session and begin watching its output
    pub fn spawn(&mut self, geometry: Geometry) -> Result<SessionId> {
        let session = Session::spawn(geometry, &self.config.spawn)?;
        session.set_nonblocking(true)?;
        let fd = session.master_fd().ok_or(PtyError::Closed)?;

        let id = SessionId(self.next_id);
        self.next_id += 1;

        // SAFETY: the descriptor is deleted from the poller before the
        // session closes it (see `remove`)
        unsafe { self.poller.add(fd, Event::readable(id.key()))? };

        log::info!(
            "Started session {} (pid {}, {})",
            id,
            session.pid(),
            geometry
        );
        self.sessions.insert(
            id,
            Entry {
                session,
                scrollback: Scrollback::new(self.config.scrollback_limit),
                pending: Vec::new(),
                registered: true,
                kill_deadline: None,
            },
        );
        Ok(id)
    }

    /// Wait for activity and collect what happened
    ///
    /// While any session exists the wait is capped so the exit sweep runs
    /// even when no master becomes ready. With no sessions, a `timeout` of
    /// `None` waits indefinitely.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<SupervisorEvent>> {
        let mut out = Vec::new();

        let timeout = self.effective_timeout(timeout);
        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }

        let ready: Vec<SessionId> = self
            .events
            .iter()
            .map(|ev| SessionId(ev.key as u64))
            .collect();
        for id in ready {
            self.flush(id, &mut out);
            self.drain(id, true, &mut out);
        }

        // Sessions past end of output get no readiness; retry their input here
        let stalled: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| !entry.registered && !entry.pending.is_empty())
            .map(|(&id, _)| id)
            .collect();
        for id in stalled {
            self.flush(id, &mut out);
        }

        self.sweep_exits(&mut out);
        self.escalate_kills();
        Ok(out)
    }

    /// Send input to a session without blocking
    ///
    /// Whatever the master does not accept right away is queued and
    /// delivered by later calls to [`Supervisor::poll`] as the child reads.
    pub fn write(&mut self, id: SessionId, data: &[u8]) -> Result<()> {
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or(MuxError::UnknownSession(id))?;

        entry.pending.extend_from_slice(data);
        flush_pending(entry)?;
        if !entry.pending.is_empty() {
            log::trace!("Queued {} bytes for session {}", entry.pending.len(), id);
            rearm(&self.poller, id, entry);
        }
        Ok(())
    }

    /// Bytes of input still waiting for the session to accept them
    pub fn pending_input(&self, id: SessionId) -> Option<usize> {
        self.sessions.get(&id).map(|entry| entry.pending.len())
    }

    pub fn resize(&self, id: SessionId, geometry: Geometry) -> Result<()> {
        self.session(id)?.resize(geometry)?;
        Ok(())
    }

    /// Deliver a signal to a session's child
    pub fn signal(&self, id: SessionId, signal: Signal) -> Result<()> {
        self.session(id)?.terminate(signal)?;
        Ok(())
    }

    /// Ask a session to exit, forcing it after the grace period
    ///
    /// The escalation happens in a later [`Supervisor::poll`].
    pub fn kill(&mut self, id: SessionId) -> Result<()> {
        let grace = self.config.kill_grace;
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or(MuxError::UnknownSession(id))?;

        entry.session.terminate(Signal::SIGTERM)?;
        if entry.kill_deadline.is_none() {
            entry.kill_deadline = Some(Instant::now() + grace);
        }
        log::debug!("Killing session {} (grace {:?})", id, grace);
        Ok(())
    }

    /// Recent output of a session, oldest first
    pub fn scrollback(&self, id: SessionId) -> Option<Vec<u8>> {
        self.sessions.get(&id).map(|entry| entry.scrollback.contents())
    }

    /// Kill every session and wait up to `deadline` for them to exit
    ///
    /// Events observed while waiting are returned. Sessions still present
    /// at the deadline are dropped, which hangs them up and reaps them in
    /// the background.
    pub fn shutdown(&mut self, deadline: Duration) -> Result<Vec<SupervisorEvent>> {
        let end = Instant::now() + deadline;
        let mut out = Vec::new();

        for id in self.sessions() {
            if let Err(e) = self.kill(id) {
                log::warn!("Failed to kill session {} during shutdown: {}", id, e);
            }
        }

        while !self.sessions.is_empty() {
            let now = Instant::now();
            if now >= end {
                break;
            }
            out.extend(self.poll(Some((end - now).min(SWEEP_INTERVAL)))?);
        }

        for id in self.sessions() {
            log::warn!("Session {} did not exit before shutdown deadline", id);
            if let Some(entry) = self.sessions.get(&id) {
                let _ = entry.session.terminate(Signal::SIGKILL);
            }
            self.remove(id);
        }
        Ok(out)
    }

    /// Ids of all live sessions, oldest first
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id).map(|entry| &entry.session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn session(&self, id: SessionId) -> Result<&Session> {
        self.get(id).ok_or(MuxError::UnknownSession(id))
    }

    /// A child can exit without its master ever becoming ready (a
    /// background job still holds the slave), so never wait unbounded
    /// while there is anything to sweep
    fn effective_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        if self.sessions.is_empty() {
            return timeout;
        }
        Some(timeout.map_or(SWEEP_INTERVAL, |t| t.min(SWEEP_INTERVAL)))
    }

    /// Push queued input; a hard write error stops watching the session
    fn flush(&mut self, id: SessionId, out: &mut Vec<SupervisorEvent>) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Err(error) = flush_pending(entry) {
            log::warn!("Write to session {} failed: {}", id, error);
            deregister(&self.poller, id, entry);
            out.push(SupervisorEvent::Failed { id, error });
        }
    }

    /// Read a session until it would block, then re-arm if asked to
    fn drain(&mut self, id: SessionId, rearm: bool, out: &mut Vec<SupervisorEvent>) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        if !entry.registered {
            return;
        }

        loop {
            match entry.session.read(&mut self.read_buf) {
                Ok(0) => {
                    log::debug!("Session {} reached end of output", id);
                    deregister(&self.poller, id, entry);
                    out.push(SupervisorEvent::Eof { id });
                    return;
                }
                Ok(n) => {
                    let data = self.read_buf[..n].to_vec();
                    entry.scrollback.push(&data);
                    out.push(SupervisorEvent::Output { id, data });
                }
                Err(PtyError::WouldBlock) => break,
                Err(error) => {
                    log::warn!("Read from session {} failed: {}", id, error);
                    deregister(&self.poller, id, entry);
                    out.push(SupervisorEvent::Failed { id, error });
                    return;
                }
            }
        }

        if rearm {
            self::rearm(&self.poller, id, entry);
        }
    }

    fn sweep_exits(&mut self, out: &mut Vec<SupervisorEvent>) {
        let mut finished = Vec::new();
        for (&id, entry) in &self.sessions {
            match entry.session.poll_exit() {
                Ok(ExitOutcome::Running) => {}
                Ok(outcome) => finished.push((id, Ok(outcome))),
                Err(error) => finished.push((id, Err(error))),
            }
        }

        for (id, result) in finished {
            // Hand out whatever the child wrote before it went away
            self.drain(id, false, out);
            match result {
                Ok(outcome) => {
                    log::info!("Session {} {}", id, outcome);
                    out.push(SupervisorEvent::Exited { id, outcome });
                }
                Err(error) => {
                    log::warn!("Lost track of session {}: {}", id, error);
                    out.push(SupervisorEvent::Failed { id, error });
                }
            }
            self.remove(id);
        }
    }

    fn escalate_kills(&mut self) {
        let now = Instant::now();
        for (id, entry) in &mut self.sessions {
            let Some(deadline) = entry.kill_deadline else {
                continue;
            };
            if now < deadline {
                continue;
            }
            entry.kill_deadline = None;
            if entry.session.state() != SessionState::Running {
                continue;
            }
            log::debug!("Session {} ignored SIGTERM; sending SIGKILL", id);
            if let Err(e) = entry.session.terminate(Signal::SIGKILL) {
                log::warn!("Failed to SIGKILL session {}: {}", id, e);
            }
        }
    }

    fn remove(&mut self, id: SessionId) {
        let Some(mut entry) = self.sessions.remove(&id) else {
            return;
        };
        deregister(&self.poller, id, &mut entry);
        if let Err(e) = entry.session.close() {
            log::debug!("Closing session {}: {}", id, e);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for id in self.sessions() {
            self.remove(id);
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("sessions", &self.sessions())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Write as much queued input as the master takes without blocking
fn flush_pending(entry: &mut Entry) -> std::result::Result<(), PtyError> {
    while !entry.pending.is_empty() {
        match entry.session.write(&entry.pending) {
            Ok(0) | Err(PtyError::WouldBlock) => break,
            Ok(n) => {
                entry.pending.drain(..n);
            }
            Err(e) => {
                entry.pending.clear();
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Watch for output, and for room to write while input is queued
fn interest(id: SessionId, entry: &Entry) -> Event {
    if entry.pending.is_empty() {
        Event::readable(id.key())
    } else {
        Event::all(id.key())
    }
}

fn rearm(poller: &Poller, id: SessionId, entry: &Entry) {
    if !entry.registered {
        return;
    }
    if let Some(fd) = entry.session.master_fd() {
        // SAFETY: the session keeps the descriptor open while it is
        // registered
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(e) = poller.modify(fd, interest(id, entry)) {
            log::warn!("Failed to re-arm session {}: {}", id, e);
        }
    }
}

fn deregister(poller: &Poller, id: SessionId, entry: &mut Entry) {
    if !entry.registered {
        return;
    }
    entry.registered = false;
    if let Some(fd) = entry.session.master_fd() {
        // SAFETY: still open; the session is closed only after this
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        if let Err(e) = poller.delete(fd) {
            log::debug!("Failed to deregister session {}: {}", id, e);
        }
    }
}
