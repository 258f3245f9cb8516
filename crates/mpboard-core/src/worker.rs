//! Board worker thread and caller-facing handle.
//!
//! Exactly one thread owns a connection's transport; everything else talks
//! to it through thread-safe queues. Callers submit requests from any thread
//! via [`BoardHandle`]; the worker drains them strictly in submission order
//! and publishes exactly one result per request. The out-of-band interrupt
//! bypasses the queue entirely: it sets the shared cancellation token and
//! injects the interrupt byte through a cloned writer, so a worker blocked
//! inside a device read observes it within one read slice.

use crate::config::BoardConfig;
use crate::error::BoardError;
use crate::repl::ReplController;
use crate::request::{
    BoardEvent, CancelToken, EventSink, PendingReply, RemainingPolicy, Request, RequestKind,
    RequestOutcome, SyncSummary,
};
use crate::sync;
use crate::transfer::DeviceFs;
use crate::transport::{Transport, TransportWriter};
use crossbeam_channel::{Receiver, Sender};
use mpboard_protocol::ExecOutput;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// What travels over the worker's input channel.
enum WorkerMessage {
    /// A caller-submitted request.
    Request(Request),
    /// Stop the worker after the requests already queued ahead of this
    /// message have been drained.
    Shutdown,
}

/// State shared between the handle family and the worker.
struct Shared {
    cancel: CancelToken,
    /// Writer for interrupt injection; cleared when the connection dies.
    interrupt_writer: Mutex<Option<Box<dyn TransportWriter>>>,
    next_id: AtomicU64,
}

/// Cloneable handle for submitting requests to a board worker.
///
/// All methods are callable from any thread and never touch the transport
/// directly. The blocking convenience wrappers are sugar over
/// [`submit`](Self::submit) + [`PendingReply::wait`].
#[derive(Clone)]
pub struct BoardHandle {
    request_tx: Sender<WorkerMessage>,
    shared: Arc<Shared>,
}

impl BoardHandle {
    /// Enqueue a request; the returned reply resolves exactly once.
    ///
    /// Fails immediately with `ConnectionLost` if the worker has stopped.
    pub fn submit(&self, kind: RequestKind) -> Result<PendingReply, BoardError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let request = Request { id, kind, reply_tx };
        self.request_tx
            .send(WorkerMessage::Request(request))
            .map_err(|_| BoardError::ConnectionLost("worker is not running".into()))?;
        Ok(PendingReply { id, rx: reply_rx })
    }

    /// Interrupt the in-flight request out-of-band.
    ///
    /// Sets the cancellation token and injects the interrupt byte so a
    /// blocked device read returns early. Queued requests are unaffected.
    pub fn interrupt(&self) {
        self.shared.cancel.cancel();
        let mut writer = self.shared.interrupt_writer.lock();
        if let Some(w) = writer.as_mut() {
            // A write failure here will also surface in the worker's read.
            if let Err(e) = w.write_all(b"\r\x03") {
                warn!("interrupt injection failed: {}", e);
            }
        }
    }

    // ========================================================================
    // Blocking convenience wrappers
    // ========================================================================

    /// Execute a code snippet. A device-side exception is returned as
    /// [`BoardError::Execution`]; the connection stays usable.
    pub fn execute(
        &self,
        code: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, BoardError> {
        let kind = RequestKind::Exec {
            code: code.into(),
            timeout,
        };
        match self.submit(kind)?.wait()? {
            RequestOutcome::Exec(output) => Ok(output),
            other => Err(mismatched_outcome("Exec", &other)),
        }
    }

    /// Recursively list the remote tree under `path`.
    pub fn list_dir(
        &self,
        path: impl Into<String>,
    ) -> Result<Vec<crate::request::RemoteFileEntry>, BoardError> {
        let kind = RequestKind::ListDir { path: path.into() };
        match self.submit(kind)?.wait()? {
            RequestOutcome::Entries(entries) => Ok(entries),
            other => Err(mismatched_outcome("ListDir", &other)),
        }
    }

    /// Stat a single remote path.
    pub fn stat(
        &self,
        path: impl Into<String>,
    ) -> Result<crate::request::RemoteFileEntry, BoardError> {
        let kind = RequestKind::Stat { path: path.into() };
        match self.submit(kind)?.wait()? {
            RequestOutcome::Entry(entry) => Ok(entry),
            other => Err(mismatched_outcome("Stat", &other)),
        }
    }

    /// Read a remote file.
    pub fn read_file(&self, path: impl Into<String>) -> Result<Vec<u8>, BoardError> {
        let kind = RequestKind::ReadFile { path: path.into() };
        match self.submit(kind)?.wait()? {
            RequestOutcome::Bytes(data) => Ok(data),
            other => Err(mismatched_outcome("ReadFile", &other)),
        }
    }

    /// Write a remote file.
    pub fn write_file(&self, path: impl Into<String>, data: Vec<u8>) -> Result<(), BoardError> {
        let kind = RequestKind::WriteFile {
            path: path.into(),
            data,
        };
        self.submit(kind)?.wait().map(|_| ())
    }

    /// Delete a remote file.
    pub fn delete(&self, path: impl Into<String>) -> Result<(), BoardError> {
        self.submit(RequestKind::Delete { path: path.into() })?
            .wait()
            .map(|_| ())
    }

    /// Create a remote directory.
    pub fn mkdir(&self, path: impl Into<String>) -> Result<(), BoardError> {
        self.submit(RequestKind::Mkdir { path: path.into() })?
            .wait()
            .map(|_| ())
    }

    /// Remove an empty remote directory.
    pub fn rmdir(&self, path: impl Into<String>) -> Result<(), BoardError> {
        self.submit(RequestKind::Rmdir { path: path.into() })?
            .wait()
            .map(|_| ())
    }

    /// Rename a remote path, copying when the firmware cannot rename.
    pub fn rename(&self, from: impl Into<String>, to: impl Into<String>) -> Result<(), BoardError> {
        self.submit(RequestKind::Rename {
            from: from.into(),
            to: to.into(),
        })?
        .wait()
        .map(|_| ())
    }

    /// Query firmware identification.
    pub fn version(&self) -> Result<crate::request::DeviceVersion, BoardError> {
        match self.submit(RequestKind::Version)?.wait()? {
            RequestOutcome::Version(version) => Ok(version),
            other => Err(mismatched_outcome("Version", &other)),
        }
    }

    /// Soft-reset the interpreter.
    pub fn soft_reset(&self) -> Result<(), BoardError> {
        self.submit(RequestKind::SoftReset)?.wait().map(|_| ())
    }

    /// Back up the remote tree into a local `.tar.gz`.
    pub fn backup(&self, archive: impl Into<PathBuf>) -> Result<SyncSummary, BoardError> {
        let kind = RequestKind::Backup {
            archive: archive.into(),
        };
        match self.submit(kind)?.wait()? {
            RequestOutcome::Sync(summary) => Ok(summary),
            other => Err(mismatched_outcome("Backup", &other)),
        }
    }

    /// Restore a local `.tar.gz` onto the device.
    pub fn restore(
        &self,
        archive: impl Into<PathBuf>,
        remaining: RemainingPolicy,
    ) -> Result<SyncSummary, BoardError> {
        let kind = RequestKind::Restore {
            archive: archive.into(),
            remaining,
        };
        match self.submit(kind)?.wait()? {
            RequestOutcome::Sync(summary) => Ok(summary),
            other => Err(mismatched_outcome("Restore", &other)),
        }
    }
}

/// The worker returned a payload that does not match the request kind.
/// This is a worker bug, reported as a lost connection rather than a panic.
fn mismatched_outcome(expected: &str, got: &RequestOutcome) -> BoardError {
    BoardError::ConnectionLost(format!(
        "worker returned mismatched outcome for {}: {:?}",
        expected, got
    ))
}

// ============================================================================
// Worker
// ============================================================================

/// A connected board: the worker thread plus the channels to talk to it.
pub struct Board {
    handle: BoardHandle,
    events: Receiver<BoardEvent>,
    thread: Option<JoinHandle<()>>,
    port_name: String,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("port_name", &self.port_name)
            .finish_non_exhaustive()
    }
}

impl Board {
    /// Cloneable request handle.
    pub fn handle(&self) -> BoardHandle {
        self.handle.clone()
    }

    /// The out-of-band notification stream (console output, progress,
    /// connection loss).
    pub fn events(&self) -> &Receiver<BoardEvent> {
        &self.events
    }

    /// The port this board was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Shut the worker down and wait for it to exit. Requests queued ahead
    /// of the shutdown still resolve; later submissions fail.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.handle.request_tx.send(WorkerMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn a worker that owns `repl` exclusively and serve requests on it.
///
/// The initial handshake is assumed done (see [`crate::connect`]); the
/// worker re-handshakes on demand whenever the protocol state requires it.
pub(crate) fn spawn_worker<T: Transport + 'static>(
    repl: ReplController<T>,
    config: BoardConfig,
    port_name: String,
) -> Result<Board, BoardError> {
    let (request_tx, request_rx) = crossbeam_channel::unbounded::<WorkerMessage>();
    let (event_tx, event_rx) = crossbeam_channel::unbounded::<BoardEvent>();

    let interrupt_writer = repl
        .interrupt_writer()
        .map_err(|e| BoardError::PortUnavailable(e.to_string()))?;
    let shared = Arc::new(Shared {
        cancel: CancelToken::new(),
        interrupt_writer: Mutex::new(Some(interrupt_writer)),
        next_id: AtomicU64::new(0),
    });

    let worker_shared = shared.clone();
    let thread = thread::Builder::new()
        .name(format!("mpboard-{}", port_name))
        .spawn(move || {
            worker_main(repl, config, request_rx, EventSink::new(event_tx), worker_shared);
        })
        .expect("Failed to spawn board worker thread");

    Ok(Board {
        handle: BoardHandle { request_tx, shared },
        events: event_rx,
        thread: Some(thread),
        port_name,
    })
}

/// Main loop: drain requests in submission order until the handle family is
/// dropped or the connection dies.
fn worker_main<T: Transport>(
    mut repl: ReplController<T>,
    config: BoardConfig,
    request_rx: Receiver<WorkerMessage>,
    events: EventSink,
    shared: Arc<Shared>,
) {
    while let Ok(message) = request_rx.recv() {
        let request = match message {
            WorkerMessage::Request(request) => request,
            WorkerMessage::Shutdown => break,
        };
        // Interrupts target the in-flight request only; a token set while
        // idle must not leak into the next one.
        shared.cancel.clear();

        let id = request.id;
        let result = handle_request(&mut repl, &config, &request.kind, &shared.cancel, &events);
        let fatal = result.as_ref().err().map(|e| e.is_fatal()).unwrap_or(false);
        let fatal_message = result
            .as_ref()
            .err()
            .filter(|_| fatal)
            .map(|e| e.to_string())
            .unwrap_or_default();
        debug!("request {} finished (fatal={})", id, fatal);
        let _ = request.reply_tx.send(result);

        if fatal {
            // Fail everything still queued, exactly once each, then stop
            // accepting requests until a fresh connect.
            while let Ok(message) = request_rx.try_recv() {
                if let WorkerMessage::Request(queued) = message {
                    let _ = queued
                        .reply_tx
                        .send(Err(BoardError::ConnectionLost(fatal_message.clone())));
                }
            }
            *shared.interrupt_writer.lock() = None;
            events.send(BoardEvent::ConnectionLost(fatal_message));
            return;
        }
    }
    debug!("board worker shutting down");
}

/// Execute one request against the controller.
fn handle_request<T: Transport>(
    repl: &mut ReplController<T>,
    config: &BoardConfig,
    kind: &RequestKind,
    cancel: &CancelToken,
    events: &EventSink,
) -> Result<RequestOutcome, BoardError> {
    match kind {
        RequestKind::Exec { code, timeout } => {
            let timeout = timeout.unwrap_or(config.exec_timeout);
            // Stream stdout to the event channel as it arrives, keeping a
            // copy for the final result.
            let mut stdout = Vec::new();
            let mut consumer = |chunk: &[u8]| {
                stdout.extend_from_slice(chunk);
                events.send(BoardEvent::Console(chunk.to_vec()));
            };
            let output = repl.execute(code, timeout, cancel, Some(&mut consumer))?;
            stdout.extend_from_slice(&output.stdout);
            match output.exception {
                Some(traceback) => Err(BoardError::Execution { traceback }),
                None => Ok(RequestOutcome::Exec(output_without_exception(stdout))),
            }
        }
        RequestKind::ListDir { path } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.list_dir(path).map(RequestOutcome::Entries)
        }
        RequestKind::Stat { path } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.stat(path).map(RequestOutcome::Entry)
        }
        RequestKind::ReadFile { path } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.read_file(path).map(RequestOutcome::Bytes)
        }
        RequestKind::WriteFile { path, data } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.write_file(path, data).map(|_| RequestOutcome::Done)
        }
        RequestKind::Delete { path } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.delete(path).map(|_| RequestOutcome::Done)
        }
        RequestKind::Mkdir { path } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.mkdir(path).map(|_| RequestOutcome::Done)
        }
        RequestKind::Rmdir { path } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.rmdir(path).map(|_| RequestOutcome::Done)
        }
        RequestKind::Rename { from, to } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.rename(from, to).map(|_| RequestOutcome::Done)
        }
        RequestKind::Version => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            fs.version().map(RequestOutcome::Version)
        }
        RequestKind::SoftReset => repl.soft_reset().map(|_| RequestOutcome::Done),
        RequestKind::Backup { archive } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            sync::backup(&mut fs, archive).map(RequestOutcome::Sync)
        }
        RequestKind::Restore { archive, remaining } => {
            let mut fs = DeviceFs::new(repl, config, cancel, events);
            sync::restore(&mut fs, archive, *remaining).map(RequestOutcome::Sync)
        }
    }
}

/// Rebuild the exec output with the exception stripped (it was mapped to an
/// error by the caller).
fn output_without_exception(stdout: Vec<u8>) -> ExecOutput {
    ExecOutput {
        stdout,
        exception: None,
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Open the named serial port, handshake into raw REPL, and spawn the
/// worker that owns the connection.
///
/// Fails with [`BoardError::PortUnavailable`] if the device cannot be
/// opened, or with a handshake error if no recognizable response arrives
/// within the configured bound.
pub fn connect(port_name: &str, config: BoardConfig) -> Result<Board, BoardError> {
    let mut transport =
        crate::transport::SerialTransport::open(port_name, config.baud_rate, config.read_slice)
            .map_err(|e| BoardError::PortUnavailable(e.to_string()))?;
    if config.reset_on_connect {
        transport
            .reset_pulse()
            .map_err(|e| BoardError::PortUnavailable(e.to_string()))?;
    }
    connect_with_transport(transport, config, port_name.to_string())
}

/// Like [`connect`], over an already-open transport. This is how tests (and
/// any non-serial link) attach a board.
pub fn connect_with_transport<T: Transport + 'static>(
    transport: T,
    config: BoardConfig,
    port_name: String,
) -> Result<Board, BoardError> {
    let mut repl = ReplController::new(transport, config.clone());
    // The probe handshake is attempted twice; boards mid-output routinely
    // miss the first interrupt.
    if let Err(e) = repl.enter_raw() {
        debug!("first handshake on {} failed: {}", port_name, e);
        repl.enter_raw()?;
    }
    spawn_worker(repl, config, port_name)
}
