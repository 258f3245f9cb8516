//! The emulated device: REPL mode machine and board handle.

use crate::interpreter::{traceback, ExecOutcome, Interpreter};
use crate::transport::EmuTransport;
use crate::vfs::Vfs;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use tracing::trace;

/// Banner printed at the friendly prompt after boot, raw exit, and soft
/// reboot.
const FRIENDLY_GREETING: &[u8] =
    b"MicroPython v1.23.0-emulated; mpboard-emu\r\nType \"help()\" for more information.\r\n>>> ";

const RAW_GREETING: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

/// Behavior knobs for the emulated firmware.
#[derive(Debug, Clone)]
pub struct EmuConfig {
    /// Whether raw-paste mode is accepted (`R\x01`) or refused (`R\x00`).
    pub raw_paste: bool,
    /// Flow-control window increment granted in raw-paste mode.
    pub window_increment: u16,
}

impl Default for EmuConfig {
    fn default() -> Self {
        EmuConfig {
            raw_paste: true,
            window_increment: 32,
        }
    }
}

/// REPL mode of the emulated firmware.
enum Mode {
    Friendly,
    Raw,
    RawPaste,
    /// A non-terminating program is "running"; only an interrupt produces
    /// the (exceptional) response.
    Hung,
}

struct Device {
    mode: Mode,
    raw_buffer: Vec<u8>,
    paste_body: Vec<u8>,
    paste_window: usize,
    interp: Interpreter,
    vfs: Arc<Mutex<Vfs>>,
    config: EmuConfig,
    out: Sender<Vec<u8>>,
}

impl Device {
    fn send(&self, bytes: &[u8]) {
        let _ = self.out.send(bytes.to_vec());
    }

    fn feed(&mut self, byte: u8) {
        match self.mode {
            Mode::Friendly => self.friendly_byte(byte),
            Mode::Raw => self.raw_byte(byte),
            Mode::RawPaste => self.paste_byte(byte),
            Mode::Hung => self.hung_byte(byte),
        }
    }

    fn friendly_byte(&mut self, byte: u8) {
        match byte {
            0x01 => {
                self.raw_buffer.clear();
                self.mode = Mode::Raw;
                self.send(RAW_GREETING);
            }
            0x02 => {} // already friendly
            0x03 => self.send(b"\r\nKeyboardInterrupt\r\n>>> "),
            0x04 => {
                // Soft reboot: session state resets, the filesystem stays.
                self.interp.reset();
                self.send(b"MPY: soft reboot\r\n");
                self.send(FRIENDLY_GREETING);
            }
            b'\r' => self.send(b"\r\n>>> "),
            b'\n' => {}
            other => self.send(&[other]), // echo
        }
    }

    fn raw_byte(&mut self, byte: u8) {
        // Raw-paste request: ENQ 'A' SOH in place of a code body.
        if self.raw_buffer.ends_with(&[0x05, b'A']) && byte == 0x01 {
            self.raw_buffer.clear();
            if self.config.raw_paste {
                self.send(b"R\x01");
                self.send(&self.config.window_increment.to_le_bytes());
                self.paste_body.clear();
                self.paste_window = self.config.window_increment as usize;
                self.mode = Mode::RawPaste;
            } else {
                self.send(b"R\x00");
            }
            return;
        }

        match byte {
            0x01 => {
                // Re-entering raw mode re-prints the banner.
                self.raw_buffer.clear();
                self.send(RAW_GREETING);
            }
            0x02 => {
                self.raw_buffer.clear();
                self.mode = Mode::Friendly;
                self.send(b"\r\n");
                self.send(FRIENDLY_GREETING);
            }
            0x03 => self.raw_buffer.clear(),
            0x04 => {
                let body = std::mem::take(&mut self.raw_buffer);
                self.send(b"OK");
                self.execute(body);
            }
            other => self.raw_buffer.push(other),
        }
    }

    fn paste_byte(&mut self, byte: u8) {
        if byte == 0x04 {
            // End of body: acknowledge, then run it.
            self.send(&[0x04]);
            let body = std::mem::take(&mut self.paste_body);
            self.mode = Mode::Raw;
            self.execute(body);
            return;
        }
        self.paste_body.push(byte);
        self.paste_window -= 1;
        if self.paste_window == 0 {
            self.send(&[0x01]);
            self.paste_window = self.config.window_increment as usize;
        }
    }

    fn hung_byte(&mut self, byte: u8) {
        if byte == 0x03 {
            let mut response = vec![0x04];
            response.extend_from_slice(traceback("KeyboardInterrupt", "").as_bytes());
            response.push(0x04);
            response.push(b'>');
            self.send(&response);
            self.mode = Mode::Raw;
        }
        // Everything else is swallowed by the "running program".
    }

    /// Run a completed code body and send the sentinel-delimited response.
    fn execute(&mut self, body: Vec<u8>) {
        let code = String::from_utf8_lossy(&body).into_owned();
        trace!("emu exec: {:?}", code);
        let outcome = {
            let mut vfs = self.vfs.lock();
            self.interp.run(&code, &mut vfs)
        };
        match outcome {
            ExecOutcome::Done { stdout, exception } => {
                let mut response = stdout;
                response.push(0x04);
                if let Some(exc) = exception {
                    response.extend_from_slice(exc.as_bytes());
                }
                response.push(0x04);
                response.push(b'>');
                self.send(&response);
            }
            ExecOutcome::Hang => self.mode = Mode::Hung,
        }
    }
}

fn device_main(mut device: Device, in_rx: Receiver<Vec<u8>>) {
    while let Ok(bytes) = in_rx.recv() {
        for byte in bytes {
            device.feed(byte);
        }
    }
}

// ============================================================================
// Board handle
// ============================================================================

/// An emulated board running on its own thread.
///
/// [`transport`](Self::transport) hands out the host side of the link;
/// the remaining methods let tests seed and inspect the filesystem and
/// inject link failures.
pub struct EmuBoard {
    vfs: Arc<Mutex<Vfs>>,
    killed: Arc<AtomicBool>,
    host_tx: Sender<Vec<u8>>,
    host_rx: Receiver<Vec<u8>>,
}

impl EmuBoard {
    /// Spawn an emulated board. The device thread exits when the last
    /// transport is dropped.
    pub fn spawn(config: EmuConfig) -> Self {
        let (host_tx, dev_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let (dev_tx, host_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let vfs = Arc::new(Mutex::new(Vfs::new()));

        let device = Device {
            mode: Mode::Friendly,
            raw_buffer: Vec::new(),
            paste_body: Vec::new(),
            paste_window: 0,
            interp: Interpreter::new(),
            vfs: vfs.clone(),
            config,
            out: dev_tx,
        };
        thread::Builder::new()
            .name("mpboard-emu-device".into())
            .spawn(move || device_main(device, dev_rx))
            .expect("Failed to spawn emulated device thread");

        EmuBoard {
            vfs,
            killed: Arc::new(AtomicBool::new(false)),
            host_tx,
            host_rx,
        }
    }

    /// The host side of the serial link. Intended to be taken once per
    /// board; the byte stream has a single logical consumer.
    pub fn transport(&self) -> EmuTransport {
        EmuTransport::new(
            self.host_tx.clone(),
            self.host_rx.clone(),
            self.killed.clone(),
        )
    }

    /// Inject a hard link failure: every subsequent transport read or write
    /// fails with an I/O error, including reads already in flight.
    pub fn kill_link(&self) {
        self.killed.store(true, std::sync::atomic::Ordering::Release);
    }

    // ========================================================================
    // Filesystem access for tests
    // ========================================================================

    /// Seed a file, creating parent directories.
    pub fn put_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.vfs.lock().put(path, data);
    }

    /// Create a directory (parents must exist).
    pub fn make_dir(&self, path: &str) {
        let _ = self.vfs.lock().mkdir(path);
    }

    /// Current content of a file, if it exists.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.vfs.lock().read(path).ok().map(|d| d.to_vec())
    }

    /// Whether a path exists.
    pub fn exists(&self, path: &str) -> bool {
        self.vfs.lock().exists(path)
    }

    /// All paths on the filesystem, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.vfs.lock().paths()
    }
}
