//! MicroPython Raw-REPL Protocol
//!
//! This crate provides types and utilities for driving a MicroPython board's
//! REPL over a raw byte stream (usually a serial port). The firmware exposes
//! two execution modes:
//!
//! - **Friendly REPL**: the human-facing prompt with echo and line editing
//! - **Raw REPL**: a machine-oriented mode where code is sent verbatim,
//!   explicitly terminated, and the response is delimited by sentinel bytes
//!
//! There is no native framing on the link; protocol boundaries are marked by
//! fixed byte sequences (prompts, banners, and `0x04` sentinels). This crate
//! owns those constants, the REPL state machine, and the codec that splits an
//! execution response into normal output and an exception payload.
//!
//! # Example
//!
//! ```rust,ignore
//! use mpboard_protocol::{ExecOutputCodec, ReplEvent, ReplState, transition};
//!
//! let state = transition(ReplState::Friendly, ReplEvent::RawEntryRequested)?;
//! assert_eq!(state, ReplState::EnteringRaw);
//!
//! let mut codec = ExecOutputCodec::new();
//! codec.push(b"OK2\r\n\x04\x04>")?;
//! let output = codec.take_output()?.unwrap();
//! assert_eq!(output.stdout, b"2\r\n");
//! ```

mod constants;
mod error;
mod response;
mod state;

pub use constants::*;
pub use error::*;
pub use response::*;
pub use state::*;
