//! Execution response codec.
//!
//! After a code body is terminated with `0x04`, the firmware replies with
//!
//! ```text
//! +----+-----------------+------+--------------------+------+---+
//! | OK | stdout bytes... | 0x04 | exception bytes... | 0x04 | > |
//! +----+-----------------+------+--------------------+------+---+
//! ```
//!
//! The stream has no length prefixes; the two `0x04` sentinels and the
//! trailing raw prompt are the only framing. The codec accumulates incoming
//! data and exposes stdout incrementally (so long-running programs can be
//! streamed to a console) while buffering the exception payload until the
//! response is complete.

use crate::{ProtocolError, EXEC_ACK, RAW_PROMPT};
use bytes::{Buf, BytesMut};

/// Decoding phase of a single execution response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the 2-byte `OK` acknowledgment.
    AwaitAck,
    /// Reading stdout until the first sentinel.
    Stdout,
    /// Reading the exception payload until the second sentinel.
    Exception,
    /// Waiting for the trailing raw prompt.
    AwaitPrompt,
    /// Response fully decoded.
    Complete,
}

/// The decoded result of one execution exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Everything the program wrote to stdout.
    pub stdout: Vec<u8>,
    /// Exception traceback text, if the firmware reported one. A device-side
    /// exception is a successful protocol exchange with a failed payload.
    pub exception: Option<String>,
}

impl ExecOutput {
    /// Whether the execution completed without a device-side exception.
    pub fn is_ok(&self) -> bool {
        self.exception.is_none()
    }
}

/// Incremental decoder for one execution response.
///
/// Feed received bytes with [`push`](Self::push); drain streamed stdout with
/// [`take_stdout`](Self::take_stdout); once [`is_complete`](Self::is_complete)
/// returns true, [`take_output`](Self::take_output) yields the final
/// [`ExecOutput`]. A fresh codec is used per execution.
#[derive(Debug)]
pub struct ExecOutputCodec {
    buffer: BytesMut,
    phase: Phase,
    stdout: BytesMut,
    exception: BytesMut,
}

impl Default for ExecOutputCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecOutputCodec {
    /// Create a codec awaiting the `OK` acknowledgment.
    pub fn new() -> Self {
        ExecOutputCodec {
            buffer: BytesMut::new(),
            phase: Phase::AwaitAck,
            stdout: BytesMut::new(),
            exception: BytesMut::new(),
        }
    }

    /// Create a codec that starts directly in the stdout phase.
    ///
    /// Raw-paste mode acknowledges the code body with a bare `0x04` (which
    /// the controller consumes during flow control) instead of `OK`, so the
    /// response stream begins with stdout.
    pub fn without_ack() -> Self {
        ExecOutputCodec {
            buffer: BytesMut::new(),
            phase: Phase::Stdout,
            stdout: BytesMut::new(),
            exception: BytesMut::new(),
        }
    }

    /// Feed received bytes and advance decoding as far as possible.
    pub fn push(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(data);
        self.process()
    }

    /// Whether the full response (both sentinels and the prompt) was decoded.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Drain stdout bytes decoded so far. May be called repeatedly while the
    /// response is still in flight.
    pub fn take_stdout(&mut self) -> Vec<u8> {
        self.stdout.split().to_vec()
    }

    /// Take the final output once the response is complete.
    ///
    /// Returns `None` while decoding is still in progress. Any stdout not
    /// previously drained with [`take_stdout`](Self::take_stdout) is
    /// included.
    pub fn take_output(&mut self) -> Result<Option<ExecOutput>, ProtocolError> {
        if self.phase != Phase::Complete {
            return Ok(None);
        }
        let stdout = self.stdout.split().to_vec();
        let exception = self.exception.split().to_vec();
        let exception = if exception.is_empty() {
            None
        } else {
            Some(String::from_utf8(exception).map_err(|_| ProtocolError::InvalidUtf8)?)
        };
        Ok(Some(ExecOutput { stdout, exception }))
    }

    fn process(&mut self) -> Result<(), ProtocolError> {
        loop {
            match self.phase {
                Phase::AwaitAck => {
                    if self.buffer.len() < EXEC_ACK.len() {
                        return Ok(());
                    }
                    if &self.buffer[..EXEC_ACK.len()] != EXEC_ACK {
                        return Err(ProtocolError::MissingAck {
                            got: self.buffer[..EXEC_ACK.len()].to_vec(),
                        });
                    }
                    self.buffer.advance(EXEC_ACK.len());
                    self.phase = Phase::Stdout;
                }
                Phase::Stdout => {
                    if !self.split_until_sentinel(true) {
                        return Ok(());
                    }
                    self.phase = Phase::Exception;
                }
                Phase::Exception => {
                    if !self.split_until_sentinel(false) {
                        return Ok(());
                    }
                    self.phase = Phase::AwaitPrompt;
                }
                Phase::AwaitPrompt => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let byte = self.buffer[0];
                    if byte != RAW_PROMPT {
                        return Err(ProtocolError::UnexpectedBytes {
                            expected: "raw prompt",
                            got: vec![byte],
                        });
                    }
                    self.buffer.advance(1);
                    self.phase = Phase::Complete;
                }
                Phase::Complete => return Ok(()),
            }
        }
    }

    /// Move buffered bytes up to the next `0x04` sentinel into the stdout or
    /// exception accumulator. Returns true if the sentinel was consumed.
    fn split_until_sentinel(&mut self, to_stdout: bool) -> bool {
        let sentinel_pos = self.buffer.iter().position(|&b| b == crate::CTRL_D);
        let (chunk, found) = match sentinel_pos {
            Some(pos) => {
                let chunk = self.buffer.split_to(pos);
                self.buffer.advance(1); // consume the sentinel
                (chunk, true)
            }
            None => (self.buffer.split(), false),
        };
        if to_stdout {
            self.stdout.unsplit(chunk);
        } else {
            self.exception.unsplit(chunk);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_output() {
        let mut codec = ExecOutputCodec::new();
        codec.push(b"OK2\r\n\x04\x04>").unwrap();
        assert!(codec.is_complete());

        let output = codec.take_output().unwrap().unwrap();
        assert_eq!(output.stdout, b"2\r\n");
        assert!(output.exception.is_none());
        assert!(output.is_ok());
    }

    #[test]
    fn test_decode_exception_payload() {
        let mut codec = ExecOutputCodec::new();
        codec
            .push(b"OK\x04Traceback (most recent call last):\r\nValueError: x\r\n\x04>")
            .unwrap();

        let output = codec.take_output().unwrap().unwrap();
        assert!(output.stdout.is_empty());
        let exc = output.exception.unwrap();
        assert!(exc.contains("ValueError"));
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let response = b"OKhello\x04\x04>";
        let mut codec = ExecOutputCodec::new();
        for &byte in response.iter() {
            codec.push(&[byte]).unwrap();
        }
        let output = codec.take_output().unwrap().unwrap();
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn test_incremental_stdout_draining() {
        let mut codec = ExecOutputCodec::new();
        codec.push(b"OKfirst ").unwrap();
        assert_eq!(codec.take_stdout(), b"first ");

        codec.push(b"second\x04\x04>").unwrap();
        let output = codec.take_output().unwrap().unwrap();
        assert_eq!(output.stdout, b"second");
    }

    #[test]
    fn test_missing_ack_is_rejected() {
        let mut codec = ExecOutputCodec::new();
        let err = codec.push(b"raw REPL").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingAck { .. }));
    }

    #[test]
    fn test_bad_trailing_prompt_is_rejected() {
        let mut codec = ExecOutputCodec::new();
        let err = codec.push(b"OKout\x04\x04?").unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedBytes { .. }));
    }

    #[test]
    fn test_incomplete_response_yields_nothing() {
        let mut codec = ExecOutputCodec::new();
        codec.push(b"OKpartial\x04").unwrap();
        assert!(!codec.is_complete());
        assert!(codec.take_output().unwrap().is_none());
    }
}
