//! Execution and protocol-level integration tests against the emulated
//! board: basic execution, device exceptions, raw-paste negotiation,
//! interrupts, timeouts, and soft reset.

mod common;

use common::{connect_emu, emu_board, test_config};
use mpboard_core::{connect_with_transport, BoardError, RequestKind};
use mpboard_emu::{EmuBoard, EmuConfig};
use std::time::{Duration, Instant};

#[test]
fn test_execute_simple_expression() {
    let emu = emu_board();
    let board = connect_emu(&emu);

    let output = board.handle().execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");
    assert!(output.exception.is_none());
}

#[test]
fn test_device_exception_is_execution_error() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    let err = handle.execute("raise ValueError('x')", None).unwrap_err();
    match err {
        BoardError::Execution { traceback } => assert!(traceback.contains("ValueError")),
        other => panic!("expected Execution error, got {:?}", other),
    }

    // The connection stays usable after a device-side exception.
    let output = handle.execute("print(2+2)", None).unwrap();
    assert_eq!(output.stdout, b"4\r\n");
}

#[test]
fn test_large_body_through_raw_paste_flow_control() {
    let emu = emu_board();
    let board = connect_emu(&emu);

    // Padding pushes the body well past the 32-byte window increment, so
    // the exchange only completes if window grants are honored.
    let code = format!("{}print(40+2)", " ".repeat(500));
    let output = board.handle().execute(code, None).unwrap();
    assert_eq!(output.stdout, b"42\r\n");
}

#[test]
fn test_fallback_when_raw_paste_is_refused() {
    let emu = EmuBoard::spawn(EmuConfig {
        raw_paste: false,
        ..EmuConfig::default()
    });
    let board = connect_emu(&emu);
    let handle = board.handle();

    let output = handle.execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");

    // Refusal is remembered; later requests skip the probe and still work.
    let output = handle.execute("print(3+4)", None).unwrap();
    assert_eq!(output.stdout, b"7\r\n");
}

#[test]
fn test_results_are_delivered_in_submission_order() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    let replies: Vec<_> = (0..5)
        .map(|i| {
            handle
                .submit(RequestKind::Exec {
                    code: format!("print(1+{})", i),
                    timeout: None,
                })
                .unwrap()
        })
        .collect();

    for (i, reply) in replies.into_iter().enumerate() {
        match reply.wait().unwrap() {
            mpboard_core::RequestOutcome::Exec(output) => {
                assert_eq!(output.stdout, format!("{}\r\n", 1 + i).into_bytes());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}

#[test]
fn test_interrupt_unblocks_infinite_loop() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    let pending = handle
        .submit(RequestKind::Exec {
            code: "while True: pass".into(),
            timeout: Some(Duration::from_secs(30)),
        })
        .unwrap();

    // Give the worker time to be blocked inside the device read.
    std::thread::sleep(Duration::from_millis(150));
    let interrupted_at = Instant::now();
    handle.interrupt();

    let result = pending
        .wait_timeout(Duration::from_secs(3))
        .expect("interrupt must resolve the in-flight request");
    assert!(matches!(result, Err(BoardError::Interrupted)));
    // Observable within a bounded window, not a poll interval.
    assert!(interrupted_at.elapsed() < Duration::from_secs(2));

    // The next request is unaffected.
    let output = handle.execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");
}

#[test]
fn test_timeout_forces_rehandshake_but_connection_recovers() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    let err = handle
        .execute("while True: pass", Some(Duration::from_millis(200)))
        .unwrap_err();
    assert!(matches!(err, BoardError::Timeout));

    // The worker re-handshakes on the next request; the board program is
    // interrupted by the handshake itself.
    let output = handle.execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");
}

#[test]
fn test_soft_reset_then_execute() {
    let emu = emu_board();
    let board = connect_emu(&emu);
    let handle = board.handle();

    handle.soft_reset().unwrap();
    let output = handle.execute("print(1+1)", None).unwrap();
    assert_eq!(output.stdout, b"2\r\n");
}

#[test]
fn test_console_events_stream_during_execution() {
    let emu = emu_board();
    let board = connect_emu(&emu);

    board.handle().execute("print(1+1)", None).unwrap();

    let mut console = Vec::new();
    while let Ok(event) = board.events().try_recv() {
        if let mpboard_core::BoardEvent::Console(bytes) = event {
            console.extend_from_slice(&bytes);
        }
    }
    assert_eq!(console, b"2\r\n");
}

#[test]
fn test_connect_handshake_timeout_when_device_is_silent() {
    // A transport nobody answers on: reads only ever time out.
    let emu = emu_board();
    let transport = emu.transport();
    emu.kill_link();

    let err = connect_with_transport(transport, test_config(), "dead0".into()).unwrap_err();
    assert!(err.is_connection_error());
}
