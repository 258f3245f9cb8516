//! REPL state machine.
//!
//! The board's REPL is modeled as an explicit state machine with a total
//! transition function: every (state, event) pair either yields a new state
//! or a [`ProtocolError::InvalidTransition`]. Nothing is silently ignored,
//! so a desynchronized exchange surfaces at the exact step that violated the
//! protocol instead of corrupting a later one.

use crate::ProtocolError;

/// State of the REPL as observed from the host side.
///
/// Exactly one value holds at any time; transitions happen only through
/// [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    /// Nothing is known about the board yet (fresh connection, or after a
    /// protocol desync that requires a full re-handshake).
    Unknown,
    /// The friendly (human-facing) prompt is idle.
    Friendly,
    /// Raw-mode entry was requested; the banner has not arrived yet.
    EnteringRaw,
    /// The raw prompt is idle and will accept a code body.
    Raw,
    /// A code body was submitted and its response is being read.
    Executing,
    /// The transport failed; the connection is unusable.
    Lost,
}

impl ReplState {
    /// Whether the state allows submitting a code body.
    pub fn can_execute(self) -> bool {
        self == ReplState::Raw
    }

    /// Whether the connection must be re-handshaken before use.
    pub fn needs_handshake(self) -> bool {
        matches!(self, ReplState::Unknown | ReplState::Lost)
    }
}

/// Events that drive the REPL state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplEvent {
    /// A fresh handshake was started; any previous knowledge is discarded.
    HandshakeStarted,
    /// The interrupt sequence was sent and the friendly prompt was read.
    FriendlyPromptSeen,
    /// The raw-mode entry sequence was written.
    RawEntryRequested,
    /// The raw banner arrived within the read window.
    RawBannerSeen,
    /// A code body was written and terminated.
    BodySubmitted,
    /// The full response (both sentinels and trailing prompt) was read.
    ResponseComplete,
    /// The raw-mode exit byte was written.
    RawExitRequested,
    /// A soft reset was requested and its banner was read.
    SoftResetComplete,
    /// An I/O error, read timeout mid-exchange, or unexpected byte occurred.
    TransportFailed,
    /// The expected reply did not arrive in time during a handshake step.
    /// Unlike [`ReplEvent::TransportFailed`] the link itself may be fine,
    /// so the machine falls back to `Unknown` rather than `Lost`.
    HandshakeTimedOut,
}

/// Total transition function for the REPL state machine.
///
/// Returns the successor state, or an error if `event` is not valid in
/// `state`. `TransportFailed` and `HandshakeTimedOut` are accepted in every
/// state; all other events are only legal where the protocol allows them.
pub fn transition(state: ReplState, event: ReplEvent) -> Result<ReplState, ProtocolError> {
    use ReplEvent::*;
    use ReplState::*;

    let next = match (state, event) {
        // Failures are legal everywhere, as is starting over.
        (_, TransportFailed) => Lost,
        (_, HandshakeTimedOut) => Unknown,
        (_, HandshakeStarted) => Unknown,

        // Handshake path.
        (Unknown, FriendlyPromptSeen) => Friendly,
        (Friendly, RawEntryRequested) => EnteringRaw,
        (EnteringRaw, RawBannerSeen) => Raw,

        // Execution cycle.
        (Raw, BodySubmitted) => Executing,
        (Executing, ResponseComplete) => Raw,

        // Leaving raw mode.
        (Raw, RawExitRequested) => Friendly,

        // Soft reset lands back at the friendly prompt.
        (Friendly, SoftResetComplete) => Friendly,

        // Re-reading the friendly prompt while already there is fine (the
        // interrupt sequence is sent unconditionally before a handshake).
        (Friendly, FriendlyPromptSeen) => Friendly,

        (state, event) => return Err(ProtocolError::InvalidTransition { state, event }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_path() {
        let s = transition(ReplState::Unknown, ReplEvent::FriendlyPromptSeen).unwrap();
        assert_eq!(s, ReplState::Friendly);
        let s = transition(s, ReplEvent::RawEntryRequested).unwrap();
        assert_eq!(s, ReplState::EnteringRaw);
        let s = transition(s, ReplEvent::RawBannerSeen).unwrap();
        assert_eq!(s, ReplState::Raw);
        assert!(s.can_execute());
    }

    #[test]
    fn test_execution_cycle_returns_to_raw() {
        let s = transition(ReplState::Raw, ReplEvent::BodySubmitted).unwrap();
        assert_eq!(s, ReplState::Executing);
        let s = transition(s, ReplEvent::ResponseComplete).unwrap();
        assert_eq!(s, ReplState::Raw);
    }

    #[test]
    fn test_transport_failure_from_any_state() {
        for state in [
            ReplState::Unknown,
            ReplState::Friendly,
            ReplState::EnteringRaw,
            ReplState::Raw,
            ReplState::Executing,
            ReplState::Lost,
        ] {
            let s = transition(state, ReplEvent::TransportFailed).unwrap();
            assert_eq!(s, ReplState::Lost);
            assert!(s.needs_handshake());
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let err = transition(ReplState::Friendly, ReplEvent::BodySubmitted).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTransition { .. }));

        let err = transition(ReplState::Executing, ReplEvent::RawEntryRequested).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTransition { .. }));
    }

    #[test]
    fn test_rehandshake_is_possible_from_lost() {
        let s = transition(ReplState::Lost, ReplEvent::HandshakeStarted).unwrap();
        assert_eq!(s, ReplState::Unknown);
        let s = transition(s, ReplEvent::FriendlyPromptSeen).unwrap();
        assert_eq!(s, ReplState::Friendly);
    }

    #[test]
    fn test_timeout_falls_back_to_unknown_not_lost() {
        let s = transition(ReplState::EnteringRaw, ReplEvent::HandshakeTimedOut).unwrap();
        assert_eq!(s, ReplState::Unknown);
        assert!(s.needs_handshake());
    }
}
