//! REPL controller.
//!
//! Drives the board's REPL through the state machine defined in
//! `mpboard-protocol`: handshake into raw mode, submit code bodies, read
//! sentinel-delimited responses, and recover to a known state after
//! failures. All blocking reads are sliced so the cancellation token is
//! observed within one [`crate::BoardConfig::read_slice`].

use crate::config::BoardConfig;
use crate::error::BoardError;
use crate::request::CancelToken;
use crate::transport::{Transport, TransportWriter};
use mpboard_protocol::{
    transition, ExecOutput, ExecOutputCodec, ProtocolError, ReplEvent, ReplState, CTRL_D,
    FRIENDLY_PROMPT, INTERRUPT_SEQUENCE, RAW_BANNER, RAW_ENTRY_SEQUENCE, RAW_EXIT_SEQUENCE,
    RAW_PASTE_ABORT, RAW_PASTE_ACCEPTED, RAW_PASTE_REFUSED, RAW_PASTE_REQUEST,
    RAW_PASTE_WINDOW_GRANT, RAW_WRITE_SLICE, SOFT_REBOOT_BANNER,
};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Raw-paste capability as learned from the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawPasteSupport {
    /// Not probed yet.
    Untried,
    /// Negotiated; the firmware granted this window increment.
    Supported {
        /// Flow-control window increment in bytes.
        window_increment: u16,
    },
    /// The firmware understands the request but refuses the mode.
    Refused,
}

/// State machine layered on a [`Transport`] that negotiates and drives the
/// firmware's machine-controlled execution mode.
pub struct ReplController<T: Transport> {
    transport: T,
    config: BoardConfig,
    state: ReplState,
    raw_paste: RawPasteSupport,
}

impl<T: Transport> ReplController<T> {
    /// Create a controller over an open transport. No bytes are exchanged
    /// until the first handshake.
    pub fn new(transport: T, config: BoardConfig) -> Self {
        ReplController {
            transport,
            config,
            state: ReplState::Unknown,
            raw_paste: RawPasteSupport::Untried,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ReplState {
        self.state
    }

    /// Clone an independent writer for out-of-band interrupt injection.
    pub fn interrupt_writer(&self) -> io::Result<Box<dyn TransportWriter>> {
        self.transport.try_clone_writer()
    }

    /// Apply a protocol event, trusting that it is legal in the current
    /// state. Used only for events the transition table accepts everywhere.
    fn force(&mut self, event: ReplEvent) {
        self.state = transition(self.state, event).unwrap_or(ReplState::Lost);
    }

    /// Apply a protocol event; an illegal event surfaces as a protocol
    /// violation and poisons the connection.
    fn apply(&mut self, event: ReplEvent) -> Result<(), BoardError> {
        match transition(self.state, event) {
            Ok(next) => {
                trace!("repl state {:?} -> {:?} on {:?}", self.state, next, event);
                self.state = next;
                Ok(())
            }
            Err(e) => {
                self.force(ReplEvent::TransportFailed);
                Err(BoardError::Protocol(e))
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), BoardError> {
        self.transport.write_all(data).map_err(|e| self.fail_io(e))
    }

    /// Mark the connection lost and render the I/O error.
    fn fail_io(&mut self, err: io::Error) -> BoardError {
        self.force(ReplEvent::TransportFailed);
        BoardError::ConnectionLost(err.to_string())
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Re-handshake from scratch: interrupt whatever runs, find the friendly
    /// prompt, then enter raw mode.
    pub fn enter_raw(&mut self) -> Result<(), BoardError> {
        if self.state == ReplState::Raw {
            return Ok(());
        }
        if self.state != ReplState::Friendly {
            self.handshake()?;
        }

        self.write_all(RAW_ENTRY_SEQUENCE)?;
        self.apply(ReplEvent::RawEntryRequested)?;
        match self.read_until(RAW_BANNER, self.config.handshake_timeout) {
            Ok(_) => self.apply(ReplEvent::RawBannerSeen)?,
            Err(BoardError::Timeout) => {
                self.force(ReplEvent::HandshakeTimedOut);
                return Err(BoardError::EnterReplFailed(
                    "raw banner did not arrive".into(),
                ));
            }
            Err(e) => return Err(e),
        }

        debug!("entered raw REPL");
        Ok(())
    }

    /// Leave raw mode back to the friendly prompt.
    pub fn exit_raw(&mut self) -> Result<(), BoardError> {
        if self.state != ReplState::Raw {
            return Ok(());
        }
        self.write_all(RAW_EXIT_SEQUENCE)?;
        self.apply(ReplEvent::RawExitRequested)
    }

    /// Drive the board to the friendly prompt from an unknown state.
    fn handshake(&mut self) -> Result<(), BoardError> {
        self.force(ReplEvent::HandshakeStarted);

        // Interrupt twice: once for a running program, once for a program
        // that catches the first KeyboardInterrupt.
        self.write_all(INTERRUPT_SEQUENCE)?;
        self.write_all(INTERRUPT_SEQUENCE)?;
        // A board left in raw mode never prints the friendly prompt; the
        // exit byte is harmless at a friendly prompt.
        self.write_all(RAW_EXIT_SEQUENCE)?;
        self.transport.clear_input().map_err(|e| self.fail_io(e))?;

        self.write_all(b"\r")?;
        match self.read_until(FRIENDLY_PROMPT, self.config.handshake_timeout) {
            Ok(_) => self.apply(ReplEvent::FriendlyPromptSeen),
            Err(BoardError::Timeout) => {
                self.force(ReplEvent::HandshakeTimedOut);
                Err(BoardError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Soft-reset the interpreter and wait for it to come back up.
    pub fn soft_reset(&mut self) -> Result<(), BoardError> {
        if self.state == ReplState::Raw {
            self.exit_raw()?;
        }
        if self.state != ReplState::Friendly {
            self.handshake()?;
        }

        self.write_all(&[CTRL_D])?;
        let collected = match self.read_until(FRIENDLY_PROMPT, self.config.handshake_timeout * 2) {
            Ok(bytes) => bytes,
            Err(BoardError::Timeout) => {
                self.force(ReplEvent::HandshakeTimedOut);
                return Err(BoardError::Timeout);
            }
            Err(e) => return Err(e),
        };
        if !contains(&collected, SOFT_REBOOT_BANNER) {
            debug!("soft reset completed without reboot banner");
        }
        self.apply(ReplEvent::SoftResetComplete)?;

        // The interpreter restarted; re-probe raw-paste support next time.
        self.raw_paste = RawPasteSupport::Untried;
        Ok(())
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute a code body and return its output.
    ///
    /// The sole execution primitive: writes the code, reads until the
    /// completion sentinels, and splits stdout from the exception payload.
    /// Returns within `timeout` or fails with [`BoardError::Timeout`], which
    /// also forces a re-handshake before further use. A device-side
    /// exception is returned inside [`ExecOutput`]; it is not a protocol
    /// failure and leaves the state at `Raw`.
    ///
    /// `consumer`, when given, receives stdout incrementally as it streams
    /// in.
    pub fn execute(
        &mut self,
        code: &str,
        timeout: Duration,
        cancel: &CancelToken,
        mut consumer: Option<&mut dyn FnMut(&[u8])>,
    ) -> Result<ExecOutput, BoardError> {
        if self.state != ReplState::Raw {
            self.enter_raw()?;
        }

        let deadline = Instant::now() + timeout;
        let pasted = self.send_body(code.as_bytes(), deadline)?;
        self.apply(ReplEvent::BodySubmitted)?;

        let mut codec = if pasted {
            ExecOutputCodec::without_ack()
        } else {
            ExecOutputCodec::new()
        };

        let mut buf = [0u8; 256];
        let mut interrupt_seen_at: Option<Instant> = None;
        while !codec.is_complete() {
            let now = Instant::now();
            if cancel.is_cancelled() && interrupt_seen_at.is_none() {
                interrupt_seen_at = Some(now);
            }
            // Once interrupted, the board gets a grace window to wind down
            // with KeyboardInterrupt even if the original deadline passed.
            let limit = match interrupt_seen_at {
                Some(at) => at + self.config.interrupt_grace,
                None => deadline,
            };
            if now >= limit {
                self.force(ReplEvent::HandshakeTimedOut);
                return Err(BoardError::Timeout);
            }

            match self.read_slice(&mut buf, limit - now) {
                Ok(0) => continue,
                Ok(n) => {
                    if let Err(e) = codec.push(&buf[..n]) {
                        self.force(ReplEvent::TransportFailed);
                        return Err(BoardError::Protocol(e));
                    }
                    if let Some(consume) = consumer.as_mut() {
                        let chunk = codec.take_stdout();
                        if !chunk.is_empty() {
                            consume(&chunk);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        self.apply(ReplEvent::ResponseComplete)?;

        let output = match codec.take_output() {
            Ok(Some(output)) => output,
            Ok(None) => {
                self.force(ReplEvent::TransportFailed);
                return Err(BoardError::Protocol(
                    ProtocolError::TruncatedResponse,
                ));
            }
            Err(e) => {
                self.force(ReplEvent::TransportFailed);
                return Err(BoardError::Protocol(e));
            }
        };

        if cancel.is_cancelled() {
            if let Some(exc) = &output.exception {
                if exc.contains("KeyboardInterrupt") {
                    return Err(BoardError::Interrupted);
                }
            }
        }
        Ok(output)
    }

    /// Write the code body, negotiating raw-paste mode when enabled.
    /// Returns whether raw-paste framing was used.
    fn send_body(&mut self, code: &[u8], deadline: Instant) -> Result<bool, BoardError> {
        if self.config.use_raw_paste && self.raw_paste != RawPasteSupport::Refused {
            self.write_all(RAW_PASTE_REQUEST)?;
            let mut reply = [0u8; 2];
            self.read_exact(&mut reply, deadline)?;
            if &reply[..] == RAW_PASTE_ACCEPTED {
                let mut window = [0u8; 2];
                self.read_exact(&mut window, deadline)?;
                let increment = u16::from_le_bytes(window);
                self.raw_paste = RawPasteSupport::Supported {
                    window_increment: increment,
                };
                self.raw_paste_write(code, increment, deadline)?;
                return Ok(true);
            } else if &reply[..] == RAW_PASTE_REFUSED {
                // Understood but disabled; the request bytes were consumed
                // and the prompt still awaits a plain body.
                debug!("raw-paste refused by firmware, using sliced writes");
                self.raw_paste = RawPasteSupport::Refused;
            } else {
                self.force(ReplEvent::TransportFailed);
                return Err(BoardError::Protocol(
                    ProtocolError::UnexpectedBytes {
                        expected: "raw-paste reply",
                        got: reply.to_vec(),
                    },
                ));
            }
        }

        // Plain raw mode: slice the body so the board's receive buffer is
        // never overrun, then terminate it.
        for chunk in code.chunks(RAW_WRITE_SLICE) {
            self.write_all(chunk)?;
        }
        self.write_all(&[CTRL_D])?;
        Ok(false)
    }

    /// Send the body under raw-paste flow control and consume the end-of-body
    /// acknowledgment.
    fn raw_paste_write(
        &mut self,
        code: &[u8],
        increment: u16,
        deadline: Instant,
    ) -> Result<(), BoardError> {
        let increment = increment as usize;
        if increment == 0 {
            self.force(ReplEvent::TransportFailed);
            return Err(BoardError::Protocol(
                ProtocolError::UnexpectedBytes {
                    expected: "nonzero window increment",
                    got: vec![0, 0],
                },
            ));
        }

        let mut window = increment;
        let mut sent = 0usize;
        let mut device_aborted = false;
        while sent < code.len() && !device_aborted {
            while window == 0 {
                let mut byte = [0u8; 1];
                self.read_exact(&mut byte, deadline)?;
                match byte[0] {
                    RAW_PASTE_WINDOW_GRANT => window += increment,
                    RAW_PASTE_ABORT => {
                        // The device cannot take more (typically out of
                        // memory); stop sending and let the resulting
                        // exception surface through the normal response.
                        device_aborted = true;
                        break;
                    }
                    other => {
                        self.force(ReplEvent::TransportFailed);
                        return Err(BoardError::Protocol(
                            ProtocolError::UnexpectedBytes {
                                expected: "raw-paste flow control byte",
                                got: vec![other],
                            },
                        ));
                    }
                }
            }
            if device_aborted {
                break;
            }
            let n = window.min(code.len() - sent);
            let end = sent + n;
            self.write_all(&code[sent..end])?;
            sent = end;
            window -= n;
        }

        self.write_all(&[CTRL_D])?;
        // Consume trailing grants until the end-of-body acknowledgment.
        loop {
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte, deadline)?;
            match byte[0] {
                RAW_PASTE_WINDOW_GRANT => continue,
                CTRL_D => break,
                other => {
                    self.force(ReplEvent::TransportFailed);
                    return Err(BoardError::Protocol(
                        ProtocolError::UnexpectedBytes {
                            expected: "end-of-body acknowledgment",
                            got: vec![other],
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Bounded reads
    // ========================================================================

    /// One bounded read of at most `remaining`, sliced to the configured
    /// read slice. Returns `Ok(0)` on a slice timeout.
    fn read_slice(&mut self, buf: &mut [u8], remaining: Duration) -> Result<usize, BoardError> {
        let slice = self.config.read_slice.min(remaining);
        self.transport
            .set_read_timeout(slice)
            .map_err(|e| self.fail_io(e))?;
        match self.transport.read(buf) {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "transport closed");
                Err(self.fail_io(err))
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(self.fail_io(e)),
        }
    }

    /// Read until the accumulated tail matches `pattern`, or fail with
    /// `Timeout` once the window elapses. Returns everything read.
    fn read_until(&mut self, pattern: &[u8], window: Duration) -> Result<Vec<u8>, BoardError> {
        let deadline = Instant::now() + window;
        let mut collected = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            if collected.ends_with(pattern) {
                return Ok(collected);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BoardError::Timeout);
            }
            let n = self.read_slice(&mut buf, deadline - now)?;
            collected.extend_from_slice(&buf[..n]);
        }
    }

    /// Read exactly `buf.len()` bytes before `deadline`.
    fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> Result<(), BoardError> {
        let mut filled = 0;
        while filled < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                self.force(ReplEvent::HandshakeTimedOut);
                return Err(BoardError::Timeout);
            }
            let mut tmp = [0u8; 64];
            let want = (buf.len() - filled).min(tmp.len());
            let n = self.read_slice(&mut tmp[..want], deadline - now)?;
            buf[filled..filled + n].copy_from_slice(&tmp[..n]);
            filled += n;
        }
        Ok(())
    }
}

/// Subsequence search over raw bytes.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
