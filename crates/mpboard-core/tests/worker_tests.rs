//! Worker lifecycle tests: connection loss drains the queue exactly once,
//! the lost notification fires, and the worker refuses further requests.

mod common;

use common::{connect_emu, emu_board};
use mpboard_core::{BoardError, BoardEvent, RequestKind};
use std::time::Duration;

#[test]
fn test_link_failure_fails_inflight_and_queued_requests() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    // A request that will be blocked in a device read when the link dies.
    let inflight = handle
        .submit(RequestKind::Exec {
            code: "while True: pass".into(),
            timeout: Some(Duration::from_secs(30)),
        })
        .unwrap();
    let queued_a = handle
        .submit(RequestKind::Exec {
            code: "print(1+1)".into(),
            timeout: None,
        })
        .unwrap();
    let queued_b = handle.submit(RequestKind::ListDir { path: "/".into() }).unwrap();

    std::thread::sleep(Duration::from_millis(150));
    emu.kill_link();

    // The in-flight request fails at the failing read; every queued request
    // is drained with ConnectionLost. Each resolves exactly once.
    let inflight_result = inflight
        .wait_timeout(Duration::from_secs(3))
        .expect("in-flight request must resolve");
    assert!(matches!(inflight_result, Err(BoardError::ConnectionLost(_))));

    for queued in [queued_a, queued_b] {
        let result = queued
            .wait_timeout(Duration::from_secs(3))
            .expect("queued request must resolve");
        assert!(matches!(result, Err(BoardError::ConnectionLost(_))));
    }

    // The lost-connection notification reaches the event stream.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    let mut lost_seen = false;
    while std::time::Instant::now() < deadline {
        match board.events().recv_timeout(Duration::from_millis(100)) {
            Ok(BoardEvent::ConnectionLost(_)) => {
                lost_seen = true;
                break;
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    assert!(lost_seen, "ConnectionLost event was not published");

    // The worker no longer accepts requests; a fresh connect is required.
    let result = handle.execute("print(1+1)", None);
    assert!(matches!(result, Err(BoardError::ConnectionLost(_))));
}

#[test]
fn test_request_failure_does_not_abort_worker() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    // A request-level failure is scoped to its request.
    let err = handle.stat("/missing.py").unwrap_err();
    assert!(matches!(err, BoardError::FileSystem { .. }));
    assert!(!err.is_connection_error());

    let output = handle.execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");
}

#[test]
fn test_close_resolves_cleanly() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    let output = handle.execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");
    board.close();

    // After close, the handle is dead.
    assert!(matches!(
        handle.execute("print(1+1)", None),
        Err(BoardError::ConnectionLost(_))
    ));
}
