//! Shared setup for integration tests against the emulated board.

use mpboard_core::{connect_with_transport, Board, BoardConfig};
use mpboard_emu::{EmuBoard, EmuConfig};
use std::time::Duration;

/// Config tuned for fast tests: short timeouts, tiny read slices.
pub fn test_config() -> BoardConfig {
    BoardConfig {
        handshake_timeout: Duration::from_secs(2),
        exec_timeout: Duration::from_secs(5),
        read_slice: Duration::from_millis(10),
        interrupt_grace: Duration::from_millis(500),
        ..BoardConfig::default()
    }
}

/// Spawn an emulated board with default firmware behavior.
pub fn emu_board() -> EmuBoard {
    EmuBoard::spawn(EmuConfig::default())
}

/// Connect the core to an emulated board.
pub fn connect_emu(emu: &EmuBoard) -> Board {
    connect_with_transport(emu.transport(), test_config(), "emu0".into())
        .expect("connect to emulated board")
}
