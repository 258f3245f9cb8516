//! Serial port discovery.
//!
//! Enumerates candidate serial devices and probes each one with a bounded
//! raw-REPL handshake; only ports that answer recognizably are reported.
//! Probing is deliberately tolerant: a port that cannot be opened or does
//! not answer is skipped, never an error.

use crate::config::BoardConfig;
use crate::repl::ReplController;
use crate::transport::SerialTransport;
use tracing::{debug, info};

/// A port that answered the handshake during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPort {
    /// Serial port name, as needed by [`crate::connect`].
    pub port_name: String,
}

/// Probe all enumerable serial ports and return those that answered the
/// Friendly→Raw handshake within the configured bound.
pub fn scan(config: &BoardConfig) -> Vec<DiscoveredPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("port enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let mut discovered = Vec::new();
    for info in ports {
        debug!("probing {}", info.port_name);
        if probe(&info.port_name, config) {
            info!("board found on {}", info.port_name);
            discovered.push(DiscoveredPort {
                port_name: info.port_name,
            });
        }
    }
    discovered
}

/// Whether the named port answers the raw-REPL handshake.
///
/// The handshake is attempted twice before giving up; boards that were in
/// the middle of program output often miss the first attempt.
pub(crate) fn probe(port_name: &str, config: &BoardConfig) -> bool {
    let transport = match SerialTransport::open(port_name, config.baud_rate, config.read_slice) {
        Ok(t) => t,
        Err(e) => {
            debug!("cannot open {}: {}", port_name, e);
            return false;
        }
    };

    let mut repl = ReplController::new(transport, config.clone());
    for attempt in 1..=2 {
        match repl.enter_raw() {
            Ok(()) => {
                let _ = repl.exit_raw();
                return true;
            }
            Err(e) => debug!("probe attempt {} on {} failed: {}", attempt, port_name, e),
        }
    }
    false
}
