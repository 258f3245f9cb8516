//! Protocol constants
//!
//! Control bytes, prompts, and sentinel sequences used by the MicroPython
//! REPL. None of these are negotiable at runtime except raw-paste mode,
//! which is capability-probed per execution (see [`RAW_PASTE_REQUEST`]).

// ============================================================================
// Control Bytes (host → firmware)
// ============================================================================

/// Enter raw REPL from the friendly REPL.
pub const CTRL_A: u8 = 0x01;
/// Exit raw REPL back to the friendly REPL.
pub const CTRL_B: u8 = 0x02;
/// Interrupt the running program (raises KeyboardInterrupt on the board).
pub const CTRL_C: u8 = 0x03;
/// End-of-transmission: terminates a code body in raw mode, triggers a soft
/// reset at an empty friendly prompt, and delimits response sections.
pub const CTRL_D: u8 = 0x04;
/// First byte of the raw-paste request sequence.
pub const CTRL_E: u8 = 0x05;

/// Sequence sent (twice) to break out of any running program before a
/// handshake. The leading `\r` terminates a possibly half-typed line.
pub const INTERRUPT_SEQUENCE: &[u8] = b"\r\x03";

/// Sequence that requests entry into raw REPL.
pub const RAW_ENTRY_SEQUENCE: &[u8] = b"\r\x01";

/// Sequence that requests exit from raw REPL.
pub const RAW_EXIT_SEQUENCE: &[u8] = b"\r\x02";

// ============================================================================
// Prompts and Banners (firmware → host)
// ============================================================================

/// The friendly REPL idle prompt.
pub const FRIENDLY_PROMPT: &[u8] = b">>> ";

/// Banner printed by the firmware when raw REPL is entered. The trailing
/// `>` is the raw-mode prompt itself.
pub const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

/// The raw REPL prompt, re-emitted after every completed execution.
pub const RAW_PROMPT: u8 = b'>';

/// Acknowledgment emitted immediately after the firmware accepts a code
/// body for execution.
pub const EXEC_ACK: &[u8] = b"OK";

/// Banner fragment printed during a soft reset.
pub const SOFT_REBOOT_BANNER: &[u8] = b"soft reboot";

// ============================================================================
// Raw-Paste Mode (capability-negotiated, firmware → host replies)
// ============================================================================

/// Request to enter raw-paste mode, sent at a raw prompt in place of a code
/// body. Firmware that predates the capability echoes these bytes back as
/// ordinary input, which the host must detect and recover from.
pub const RAW_PASTE_REQUEST: &[u8] = b"\x05A\x01";

/// Reply indicating raw-paste mode is supported and entered. Followed by a
/// little-endian `u16` window-size increment.
pub const RAW_PASTE_ACCEPTED: &[u8] = b"R\x01";

/// Reply indicating the firmware understands the request but has the
/// capability disabled.
pub const RAW_PASTE_REFUSED: &[u8] = b"R\x00";

/// Flow-control byte from the firmware granting one more window increment
/// of code body bytes.
pub const RAW_PASTE_WINDOW_GRANT: u8 = 0x01;

/// Flow-control byte from the firmware asking the host to stop sending and
/// terminate the body.
pub const RAW_PASTE_ABORT: u8 = 0x04;

// ============================================================================
// Limits
// ============================================================================

/// Slice size for writing a code body when raw-paste mode is unavailable.
/// Small enough not to overrun the board's serial receive buffer.
pub const RAW_WRITE_SLICE: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_distinct() {
        // CTRL_D plays three roles; everything else must not collide with it.
        assert_ne!(CTRL_A, CTRL_D);
        assert_ne!(CTRL_B, CTRL_D);
        assert_ne!(CTRL_C, CTRL_D);
        assert_eq!(RAW_PASTE_ABORT, CTRL_D);
    }

    #[test]
    fn test_raw_banner_ends_with_prompt() {
        assert_eq!(*RAW_BANNER.last().unwrap(), RAW_PROMPT);
    }
}
