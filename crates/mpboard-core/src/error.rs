//! Board error taxonomy.
//!
//! Every result delivered to a caller carries one of these variants; callers
//! render user-facing messages directly from the variant and its payload.
//! The split between connection-level and request-level errors decides what
//! the worker does next, see [`BoardError::is_connection_error`].

use mpboard_protocol::ProtocolError;
use thiserror::Error;

/// Filesystem failure categories reported by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemErrorKind {
    /// The path does not exist.
    NotFound,
    /// The path already exists.
    AlreadyExists,
    /// A directory could not be removed because it is not empty.
    NotEmpty,
    /// The path is not a valid name on the device filesystem.
    InvalidName,
    /// Any other `OSError` raised by the device.
    Other,
}

impl std::fmt::Display for FileSystemErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSystemErrorKind::NotFound => write!(f, "not found"),
            FileSystemErrorKind::AlreadyExists => write!(f, "already exists"),
            FileSystemErrorKind::NotEmpty => write!(f, "directory not empty"),
            FileSystemErrorKind::InvalidName => write!(f, "invalid name"),
            FileSystemErrorKind::Other => write!(f, "filesystem error"),
        }
    }
}

/// Errors produced by board communication.
#[derive(Error, Debug, Clone)]
pub enum BoardError {
    /// The serial device could not be opened.
    #[error("port unavailable: {0}")]
    PortUnavailable(String),

    /// The raw-REPL handshake did not complete.
    #[error("failed to enter raw REPL: {0}")]
    EnterReplFailed(String),

    /// An exchange did not complete within its deadline.
    #[error("timed out waiting for the board")]
    Timeout,

    /// The device raised an exception while executing code. This is a
    /// successful protocol exchange with a failed payload; the connection
    /// remains usable.
    #[error("device exception: {traceback}")]
    Execution {
        /// The traceback text reported by the firmware.
        traceback: String,
    },

    /// The in-flight request was interrupted on caller request.
    #[error("interrupted")]
    Interrupted,

    /// The serial link failed or the worker is gone; a fresh connect is
    /// required.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Unexpected bytes where a sentinel was expected, or an invalid state
    /// transition. Forces a full re-handshake.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// A transferred file's reassembled length did not match the size the
    /// device reported.
    #[error("transfer integrity error: expected {expected} bytes, got {actual}")]
    TransferIntegrity {
        /// Size reported by the device.
        expected: u64,
        /// Bytes actually reassembled.
        actual: u64,
    },

    /// A filesystem operation failed on the device.
    #[error("{kind}: {path}")]
    FileSystem {
        /// Failure category.
        kind: FileSystemErrorKind,
        /// The remote path the operation targeted.
        path: String,
    },

    /// Local archive I/O failed during backup or restore.
    #[error("archive error: {0}")]
    Archive(String),
}

impl BoardError {
    /// Whether this error invalidates the connection as a whole.
    ///
    /// Connection-level errors fail every queued request and require a fresh
    /// connect; request-level errors are scoped to the single request.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BoardError::Timeout
                | BoardError::ConnectionLost(_)
                | BoardError::Protocol(_)
                | BoardError::EnterReplFailed(_)
        )
    }

    /// Whether the connection is beyond re-handshaking.
    ///
    /// A timeout leaves the link itself intact (the next request triggers a
    /// fresh handshake), but an I/O failure or a protocol desync means the
    /// byte stream can no longer be trusted: the worker drains its queue and
    /// stops until a fresh connect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BoardError::ConnectionLost(_) | BoardError::Protocol(_))
    }
}

/// Map a device `OSError` traceback to a [`BoardError::FileSystem`] value.
///
/// MicroPython ports differ in whether they render symbolic names
/// (`ENOENT`) or bare errno numbers, so both are recognized.
pub(crate) fn map_os_error(traceback: &str, path: &str) -> BoardError {
    let kind = if traceback.contains("ENOENT") || errno_is(traceback, &[2]) {
        FileSystemErrorKind::NotFound
    } else if traceback.contains("EEXIST") || errno_is(traceback, &[17]) {
        FileSystemErrorKind::AlreadyExists
    } else if traceback.contains("ENOTEMPTY") || errno_is(traceback, &[39, 90]) {
        FileSystemErrorKind::NotEmpty
    } else if traceback.contains("EINVAL") || errno_is(traceback, &[22]) {
        FileSystemErrorKind::InvalidName
    } else {
        FileSystemErrorKind::Other
    };
    BoardError::FileSystem {
        kind,
        path: path.to_string(),
    }
}

/// Check whether the traceback carries one of the given errno numbers,
/// either as `[Errno N]` or as a bare `OSError: N`.
fn errno_is(traceback: &str, numbers: &[i32]) -> bool {
    numbers.iter().any(|n| {
        traceback.contains(&format!("[Errno {}]", n))
            || traceback
                .lines()
                .any(|l| l.trim() == format!("OSError: {}", n))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_symbolic_errno() {
        let err = map_os_error("OSError: [Errno 2] ENOENT", "/main.py");
        assert!(matches!(
            err,
            BoardError::FileSystem {
                kind: FileSystemErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_map_bare_errno() {
        let err = map_os_error("Traceback (most recent call last):\nOSError: 17", "/lib");
        assert!(matches!(
            err,
            BoardError::FileSystem {
                kind: FileSystemErrorKind::AlreadyExists,
                ..
            }
        ));
    }

    #[test]
    fn test_map_unknown_oserror() {
        let err = map_os_error("OSError: 5", "/x");
        assert!(matches!(
            err,
            BoardError::FileSystem {
                kind: FileSystemErrorKind::Other,
                ..
            }
        ));
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(BoardError::Timeout.is_connection_error());
        assert!(BoardError::ConnectionLost("gone".into()).is_connection_error());
        assert!(!BoardError::Interrupted.is_connection_error());
        assert!(!BoardError::Execution {
            traceback: "ValueError: x".into()
        }
        .is_connection_error());
        assert!(!BoardError::FileSystem {
            kind: FileSystemErrorKind::NotFound,
            path: "/a".into()
        }
        .is_connection_error());
    }
}
