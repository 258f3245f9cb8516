//! Protocol error types.

use crate::{ReplEvent, ReplState};
use thiserror::Error;

/// Errors that can occur while driving the raw-REPL protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An event arrived that is not valid for the current REPL state.
    #[error("invalid transition: {event:?} in state {state:?}")]
    InvalidTransition {
        /// State the machine was in.
        state: ReplState,
        /// Event that was rejected.
        event: ReplEvent,
    },

    /// A sentinel or prompt was expected but different bytes arrived.
    #[error("unexpected bytes where {expected} was expected: {got:?}")]
    UnexpectedBytes {
        /// Human-readable name of what was expected.
        expected: &'static str,
        /// The bytes actually received (truncated for display).
        got: Vec<u8>,
    },

    /// The execution acknowledgment (`OK`) did not arrive.
    #[error("firmware did not acknowledge code body: {got:?}")]
    MissingAck {
        /// The two bytes read in place of the acknowledgment.
        got: Vec<u8>,
    },

    /// The response stream ended before both sentinel separators were seen.
    #[error("truncated execution response")]
    TruncatedResponse,

    /// Exception payload was not valid UTF-8.
    #[error("invalid UTF-8 in exception payload")]
    InvalidUtf8,
}
