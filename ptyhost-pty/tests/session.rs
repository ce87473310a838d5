//! Integration tests for PTY sessions
//!
//! These tests verify end-to-end behavior with a real PTY and shell.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ptyhost_pty::{
    compat, spawn, ExitOutcome, Geometry, PtyError, Session, SessionState, Signal, SpawnConfig,
};

fn sh() -> SpawnConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    SpawnConfig::from_env().with_shell("/bin/sh")
}

/// Helper to accumulate output until `needle` shows up or time runs out
fn read_until(session: &Session, needle: &str, timeout_ms: u64) -> String {
    let mut output = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    while Instant::now() < deadline {
        match session.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                output.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&output).contains(needle) {
                    break;
                }
            }
            Err(e) if e.is_would_block() => thread::sleep(Duration::from_millis(10)),
            Err(e) => panic!("read failed: {e}"),
        }
    }

    String::from_utf8_lossy(&output).into_owned()
}

/// Helper to poll until the child is gone
fn poll_until_exit(session: &Session, timeout_ms: u64) -> ExitOutcome {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let outcome = session.poll_exit().expect("poll_exit failed");
        if outcome.is_terminal() || Instant::now() > deadline {
            return outcome;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn kill_and_reap(session: &Session) {
    let _ = session.terminate(Signal::SIGKILL);
    poll_until_exit(session, 5000);
}

// ============================================================================
// Spawn
// ============================================================================

#[test]
fn test_spawn_then_poll_is_running() {
    let session = spawn(24, 80, &sh()).expect("Failed to spawn");
    assert_eq!(session.poll_exit().unwrap(), ExitOutcome::Running);
    assert_eq!(compat::packed_status(&session.poll_exit()), 0);
    kill_and_reap(&session);
}

#[test]
fn test_invalid_shell_reports_127() {
    let config = SpawnConfig::default().with_shell("/definitely/not/a/shell");
    let session = spawn(24, 80, &config).expect("spawn itself must succeed");

    let outcome = poll_until_exit(&session, 5000);
    assert_eq!(outcome, ExitOutcome::Exited(127));
    assert_eq!(outcome.shell_status(), Some(127));
}

#[test]
fn test_user_shell_preference_is_used() {
    let config = SpawnConfig {
        user_shell: Some("/bin/cat".into()),
        ..SpawnConfig::default()
    };
    let session = spawn(24, 80, &config).unwrap();
    session.set_nonblocking(true).unwrap();

    session.write_all(b"through cat\n").unwrap();
    let output = read_until(&session, "through cat\r\nthrough cat", 3000);
    assert!(
        output.contains("through cat\r\nthrough cat"),
        "Expected echo and cat output, got: {output:?}"
    );

    kill_and_reap(&session);
}

#[test]
fn test_terminal_capability_environment() {
    let config = sh().with_env("TERM", "dumb");
    let session = spawn(24, 80, &config).unwrap();
    session.set_nonblocking(true).unwrap();

    session
        .write_all(b"echo \"ENV<$TERM:$COLORTERM>\"\n")
        .unwrap();
    let output = read_until(&session, "ENV<xterm-256color:truecolor>", 3000);
    assert!(
        output.contains("ENV<xterm-256color:truecolor>"),
        "Unexpected output: {output:?}"
    );

    kill_and_reap(&session);
}

#[test]
fn test_working_directory() {
    let config = sh().with_cwd("/");
    let session = spawn(24, 80, &config).unwrap();
    session.set_nonblocking(true).unwrap();

    session.write_all(b"echo \"CWD<$(pwd)>\"\n").unwrap();
    let output = read_until(&session, "CWD</>", 3000);
    assert!(output.contains("CWD</>"), "Unexpected output: {output:?}");

    kill_and_reap(&session);
}

// ============================================================================
// I/O
// ============================================================================

#[test]
fn test_echo_round_trip_preserves_bytes() {
    let config = SpawnConfig::default().with_shell("/bin/cat");
    let session = spawn(24, 80, &config).unwrap();
    session.set_nonblocking(true).unwrap();

    // No newline: the line discipline only echoes, cat has nothing to print
    let input = "plain text 0123 héllo wörld";
    session.write_all(input.as_bytes()).unwrap();
    let output = read_until(&session, input, 3000);
    assert_eq!(output, input);

    kill_and_reap(&session);
}

#[test]
fn test_concurrent_reader_and_writer() {
    let session = Arc::new(spawn(24, 80, &sh()).unwrap());
    session.set_nonblocking(true).unwrap();

    let reader = {
        let session = Arc::clone(&session);
        thread::spawn(move || read_until(&session, "CONCURRENT_3", 5000))
    };

    for i in 1..=3 {
        session
            .write_all(format!("echo CONCURRENT_$(( {i} ))\n").as_bytes())
            .unwrap();
    }

    let output = reader.join().unwrap();
    assert!(output.contains("CONCURRENT_3"), "Unexpected output: {output:?}");

    kill_and_reap(&session);
    session.close().unwrap();
}

#[test]
fn test_read_reports_end_of_stream() {
    let config = SpawnConfig::default().with_shell("/bin/true");
    let session = spawn(24, 80, &config).unwrap();
    assert_eq!(poll_until_exit(&session, 5000), ExitOutcome::Exited(0));

    let mut buf = [0u8; 256];
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match session.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => panic!("expected end of stream, got {e}"),
        }
        assert!(Instant::now() < deadline, "no end of stream");
    }
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn test_resize_is_seen_by_child() {
    let session = spawn(24, 80, &sh()).unwrap();
    session.set_nonblocking(true).unwrap();

    session.resize(Geometry::new(33, 101)).unwrap();
    session.write_all(b"echo \"SIZE<$(stty size)>\"\n").unwrap();

    let output = read_until(&session, "SIZE<33 101>", 3000);
    assert!(output.contains("SIZE<33 101>"), "Unexpected output: {output:?}");

    kill_and_reap(&session);
}

#[test]
fn test_initial_geometry_is_applied() {
    let session = spawn(50, 132, &sh()).unwrap();
    assert_eq!(session.geometry().unwrap(), Geometry::new(50, 132));
    kill_and_reap(&session);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_operations_after_close_fail_fast() {
    let session = spawn(24, 80, &sh()).unwrap();
    session.close().unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 8];
    assert!(matches!(session.read(&mut buf), Err(PtyError::Closed)));
    assert!(matches!(session.write(b"ls\n"), Err(PtyError::Closed)));
    assert!(matches!(
        session.resize(Geometry::new(10, 40)),
        Err(PtyError::Closed)
    ));
    assert!(matches!(session.close(), Err(PtyError::Closed)));
    assert!(start.elapsed() < Duration::from_secs(1));

    // Closing the master does not reap; the lifecycle is still ours
    kill_and_reap(&session);
}

#[test]
fn test_drop_reaps_child() {
    let session = spawn(24, 80, &sh()).unwrap();
    let pid = session.pid();
    drop(session);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if nix::sys::signal::kill(pid, None).is_err() {
            break;
        }
        assert!(Instant::now() < deadline, "pid {pid} still present after drop");
        thread::sleep(Duration::from_millis(20));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_forceful_terminate() {
    let session = spawn(24, 80, &sh()).unwrap();
    session.terminate(Signal::SIGKILL).unwrap();

    let outcome = poll_until_exit(&session, 5000);
    assert_eq!(outcome, ExitOutcome::Signaled(Signal::SIGKILL));
    assert_eq!(session.state(), SessionState::Signaled(Signal::SIGKILL));
    assert_eq!(compat::packed_status(&Ok(outcome)), 137);
}

#[test]
fn test_graceful_terminate_can_be_ignored() {
    let session = spawn(24, 80, &sh()).unwrap();
    session.set_nonblocking(true).unwrap();

    // Split the marker so the echoed command line cannot match it
    session.write_all(b"trap '' TERM; echo TRAP\"\"PED\n").unwrap();
    let output = read_until(&session, "TRAPPED", 3000);
    assert!(output.contains("TRAPPED"), "Unexpected output: {output:?}");

    session.terminate(Signal::SIGTERM).unwrap();
    for _ in 0..10 {
        assert_eq!(session.poll_exit().unwrap(), ExitOutcome::Running);
        thread::sleep(Duration::from_millis(30));
    }

    session.terminate(Signal::SIGKILL).unwrap();
    assert_eq!(
        poll_until_exit(&session, 5000),
        ExitOutcome::Signaled(Signal::SIGKILL)
    );
}

#[test]
fn test_poll_twice_after_reap() {
    let session = spawn(24, 80, &sh()).unwrap();
    session.set_nonblocking(true).unwrap();
    session.write_all(b"exit 3\n").unwrap();

    assert_eq!(poll_until_exit(&session, 5000), ExitOutcome::Exited(3));
    let second = session.poll_exit();
    assert!(matches!(second, Err(PtyError::AlreadyReaped)));
    assert!(compat::packed_status(&second) < 0);
}

#[test]
fn test_end_to_end_session() {
    let session = spawn(24, 80, &sh()).unwrap();
    session.set_nonblocking(true).unwrap();

    session.write_all(b"echo hi\n").unwrap();
    let output = read_until(&session, "hi\r\n", 3000);
    assert!(output.contains("hi"), "Unexpected output: {output:?}");

    // Interactive shells commonly ignore SIGTERM; escalate if it does
    session.terminate(Signal::SIGTERM).unwrap();
    let mut outcome = poll_until_exit(&session, 300);
    if !outcome.is_terminal() {
        session.terminate(Signal::SIGKILL).unwrap();
        outcome = poll_until_exit(&session, 5000);
    }
    assert!(
        matches!(outcome, ExitOutcome::Exited(_) | ExitOutcome::Signaled(_)),
        "unexpected outcome {outcome:?}"
    );

    assert!(session.close().is_ok());
    assert!(session.close().is_err());
}
