//! # mpboard-core
//!
//! Board communication core for MicroPython devices over a serial link:
//! connection management, raw-REPL protocol control, snippet execution,
//! remote filesystem operations, and archive-based backup/restore.
//!
//! ## Architecture
//!
//! Exactly one worker thread owns a connection's transport; every caller
//! interacts through the thread-safe [`BoardHandle`] request queue and the
//! out-of-band [`BoardEvent`] stream. File transfer and sync are higher
//! level request kinds layered on the same queue, never bypassing it.
//!
//! ```no_run
//! use mpboard_core::{connect, BoardConfig};
//!
//! let board = connect("/dev/ttyACM0", BoardConfig::default())?;
//! let output = board.handle().execute("print(1+1)", None)?;
//! assert_eq!(output.stdout, b"2\r\n");
//! # Ok::<(), mpboard_core::BoardError>(())
//! ```

mod config;
mod discovery;
mod error;
mod repl;
mod request;
mod sync;
mod transfer;
mod transport;
mod worker;

pub use config::BoardConfig;
pub use discovery::{scan, DiscoveredPort};
pub use error::{BoardError, FileSystemErrorKind};
pub use repl::ReplController;
pub use request::{
    BoardEvent, CancelToken, DeviceVersion, EntryKind, PendingReply, RemainingDisposition,
    RemainingFile, RemainingPolicy, RemoteFileEntry, RequestId, RequestKind, RequestOutcome,
    SyncFailure, SyncSummary,
};
pub use transport::{SerialTransport, Transport, TransportWriter};
pub use worker::{connect, connect_with_transport, Board, BoardHandle};

pub use mpboard_protocol::{ExecOutput, ReplState};
