//! Request, result, and notification types.
//!
//! Callers never touch the transport; they enqueue a [`RequestKind`] through
//! a [`crate::BoardHandle`] and receive exactly one result through the
//! returned [`PendingReply`]. Out-of-band notifications (console output,
//! transfer progress, connection loss) arrive on a separate event channel.

use crate::error::BoardError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use mpboard_protocol::ExecOutput;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation token shared between a handle and its worker.
///
/// The worker checks the token at every bounded read slice, so cancellation
/// latency is deterministic rather than dependent on a poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight operation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Reset the token before a new request starts.
    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Correlation id assigned at submission; unique per handle family.
pub type RequestId = u64;

/// Policy for files that exist on the device but not in the archive being
/// restored. There is no hidden default; the caller must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemainingPolicy {
    /// Leave remaining files untouched.
    Keep,
    /// Delete remaining files after the plan has been applied.
    Delete,
}

/// The operations a caller can enqueue.
///
/// Interrupt is intentionally absent: it is an out-of-band signal on the
/// handle, not a queued request.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// Execute a code snippet and collect its output.
    Exec {
        /// Source code to run.
        code: String,
        /// Per-request deadline; the configured default applies when `None`.
        timeout: Option<Duration>,
    },
    /// Recursively list the remote tree under `path`.
    ListDir {
        /// Remote directory path; `/` is the filesystem root.
        path: String,
    },
    /// Stat a single remote path.
    Stat {
        /// Remote path.
        path: String,
    },
    /// Read a remote file's content.
    ReadFile {
        /// Remote path.
        path: String,
    },
    /// Write a remote file, creating or truncating it.
    WriteFile {
        /// Remote path.
        path: String,
        /// File content.
        data: Vec<u8>,
    },
    /// Delete a remote file.
    Delete {
        /// Remote path.
        path: String,
    },
    /// Create a remote directory.
    Mkdir {
        /// Remote path.
        path: String,
    },
    /// Remove an empty remote directory.
    Rmdir {
        /// Remote path.
        path: String,
    },
    /// Rename a remote file or directory, copying when rename fails.
    Rename {
        /// Existing remote path.
        from: String,
        /// New remote path.
        to: String,
    },
    /// Query `os.uname()`.
    Version,
    /// Soft-reset the interpreter.
    SoftReset,
    /// Back up the remote tree into a local archive.
    Backup {
        /// Destination `.tar.gz` path.
        archive: PathBuf,
    },
    /// Restore a local archive onto the device.
    Restore {
        /// Source `.tar.gz` path.
        archive: PathBuf,
        /// Disposition of device files absent from the archive.
        remaining: RemainingPolicy,
    },
}

// ============================================================================
// Results
// ============================================================================

/// A file or directory on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileEntry {
    /// Absolute remote path.
    pub path: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Entry kind.
    pub kind: EntryKind,
}

/// Kind of a remote filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl RemoteFileEntry {
    /// Whether this entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Firmware identification from `os.uname()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceVersion {
    /// Operating system name.
    pub sysname: String,
    /// Network name of the board.
    pub nodename: String,
    /// Firmware release.
    pub release: String,
    /// Firmware version/build string.
    pub version: String,
    /// Hardware identifier.
    pub machine: String,
}

/// What happened to one remaining file during a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemainingDisposition {
    /// Left untouched per [`RemainingPolicy::Keep`].
    Kept,
    /// Deleted per [`RemainingPolicy::Delete`].
    Deleted,
    /// Deletion was requested but failed.
    DeleteFailed(String),
}

/// A remaining file and what was done about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingFile {
    /// Remote path.
    pub path: String,
    /// What happened to it.
    pub disposition: RemainingDisposition,
}

/// One per-file failure recorded by backup or restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Remote path.
    pub path: String,
    /// Rendered error.
    pub error: String,
}

/// Aggregate outcome of a backup or restore run.
///
/// Per-file failures are recorded here rather than aborting the run; only a
/// connection-level failure aborts outright.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Files newly written (all copied files, for a backup).
    pub created: Vec<String>,
    /// Files overwritten because size or hash differed.
    pub overwritten: Vec<String>,
    /// Files skipped because they already matched.
    pub unchanged: Vec<String>,
    /// Device files absent from the archive, with their dispositions.
    pub remaining: Vec<RemainingFile>,
    /// Per-file failures; the run continued past each.
    pub failures: Vec<SyncFailure>,
    /// Total file bytes moved over the link.
    pub bytes_transferred: u64,
}

impl SyncSummary {
    /// Whether every file was processed without failure.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Successful payload of a completed request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Output of an `Exec` request (device exceptions are mapped to
    /// [`BoardError::Execution`] before delivery, so `exception` is absent
    /// here).
    Exec(ExecOutput),
    /// Entries from `ListDir`.
    Entries(Vec<RemoteFileEntry>),
    /// Entry from `Stat`.
    Entry(RemoteFileEntry),
    /// Content from `ReadFile`.
    Bytes(Vec<u8>),
    /// Firmware identification from `Version`.
    Version(DeviceVersion),
    /// Summary from `Backup` or `Restore`.
    Sync(SyncSummary),
    /// Completion of a request with no payload.
    Done,
}

/// One request as it travels to the worker.
pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) kind: RequestKind,
    pub(crate) reply_tx: Sender<Result<RequestOutcome, BoardError>>,
}

/// The caller's side of a submitted request.
///
/// Resolves exactly once. Dropping it discards the result; the request
/// still runs.
#[derive(Debug)]
pub struct PendingReply {
    pub(crate) id: RequestId,
    pub(crate) rx: Receiver<Result<RequestOutcome, BoardError>>,
}

impl PendingReply {
    /// The correlation id assigned at submission.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Block until the worker publishes the result.
    pub fn wait(self) -> Result<RequestOutcome, BoardError> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(BoardError::ConnectionLost("worker shut down".into())))
    }

    /// Block up to `timeout` for the result.
    ///
    /// On timeout the reply handle is returned so the caller can keep
    /// waiting; the request is not cancelled.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<RequestOutcome, BoardError>, Self> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => {
                Ok(Err(BoardError::ConnectionLost("worker shut down".into())))
            }
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Out-of-band notifications published by the worker.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Raw console output produced while an `Exec` request is running.
    Console(Vec<u8>),
    /// Transfer progress for the named remote path.
    Progress {
        /// Remote path being transferred.
        path: String,
        /// Bytes done so far.
        done: u64,
        /// Total bytes, when known.
        total: u64,
    },
    /// Human-readable status line (mirrors what the worker is doing).
    Status(String),
    /// The connection failed; queued requests were drained with
    /// [`BoardError::ConnectionLost`] and a fresh connect is required.
    ConnectionLost(String),
}

/// Worker-side event publisher. Sending never blocks and never fails; a
/// disconnected receiver just drops the notifications.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Sender<BoardEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<BoardEvent>) -> Self {
        EventSink { tx }
    }

    pub(crate) fn send(&self, event: BoardEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn progress(&self, path: &str, done: u64, total: u64) {
        self.send(BoardEvent::Progress {
            path: path.to_string(),
            done,
            total,
        });
    }

    pub(crate) fn status(&self, msg: impl Into<String>) {
        self.send(BoardEvent::Status(msg.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_roundtrip() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.clear();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_pending_reply_resolves_to_lost_when_worker_is_gone() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(tx);
        let reply = PendingReply { id: 1, rx };
        assert!(matches!(reply.wait(), Err(BoardError::ConnectionLost(_))));
    }

    #[test]
    fn test_sync_summary_clean() {
        let mut summary = SyncSummary::default();
        assert!(summary.is_clean());
        summary.failures.push(SyncFailure {
            path: "/a.py".into(),
            error: "timed out".into(),
        });
        assert!(!summary.is_clean());
    }
}
