//! Connection and protocol configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a board connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Serial baud rate.
    pub baud_rate: u32,

    /// Toggle the control lines to reset the board before the handshake.
    /// Some boards only present a clean prompt after a reset pulse.
    pub reset_on_connect: bool,

    /// Upper bound for the Friendly→Raw handshake, per attempt.
    pub handshake_timeout: Duration,

    /// Default upper bound for a single `execute` exchange. Individual
    /// requests may override this.
    pub exec_timeout: Duration,

    /// Duration of one blocking read slice. The cancellation token is
    /// checked between slices, so this bounds interrupt latency.
    pub read_slice: Duration,

    /// Extra time allowed for the board to wind down after an interrupt
    /// was injected into a running execution.
    pub interrupt_grace: Duration,

    /// Transfer chunk size in raw bytes. Bounded by the board's memory and
    /// serial receive buffer; hex encoding doubles it on the wire.
    pub chunk_size: usize,

    /// Attempt raw-paste (flow-controlled) mode for code bodies. Falls back
    /// to sliced writes when the firmware refuses.
    pub use_raw_paste: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            baud_rate: 115_200,
            reset_on_connect: false,
            handshake_timeout: Duration::from_secs(2),
            exec_timeout: Duration::from_secs(10),
            read_slice: Duration::from_millis(25),
            interrupt_grace: Duration::from_millis(750),
            chunk_size: 256,
            use_raw_paste: true,
        }
    }
}

impl BoardConfig {
    /// Config with the given baud rate, other fields at their defaults.
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        BoardConfig {
            baud_rate,
            ..Default::default()
        }
    }
}
