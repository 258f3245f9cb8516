//! Host-side transport over the emulated link.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use mpboard_core::{Transport, TransportWriter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn link_failure() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "injected link failure")
}

/// [`Transport`] implementation backed by the emulated device's channels.
pub struct EmuTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    read_timeout: Duration,
    killed: Arc<AtomicBool>,
}

impl EmuTransport {
    pub(crate) fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>, killed: Arc<AtomicBool>) -> Self {
        EmuTransport {
            tx,
            rx,
            pending: Vec::new(),
            read_timeout: Duration::from_millis(25),
            killed,
        }
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl Transport for EmuTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_killed() {
            return Err(link_failure());
        }
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buf));
        }
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(bytes) => {
                self.pending = bytes;
                Ok(self.take_pending(buf))
            }
            Err(RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
            }
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "emulated device is gone",
            )),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.is_killed() {
            return Err(link_failure());
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "emulated device is gone"))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn reset_pulse(&mut self) -> io::Result<()> {
        // The emulated board has no control lines.
        Ok(())
    }

    fn try_clone_writer(&self) -> io::Result<Box<dyn TransportWriter>> {
        Ok(Box::new(EmuWriter {
            tx: self.tx.clone(),
            killed: self.killed.clone(),
        }))
    }
}

struct EmuWriter {
    tx: Sender<Vec<u8>>,
    killed: Arc<AtomicBool>,
}

impl TransportWriter for EmuWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.killed.load(Ordering::Acquire) {
            return Err(link_failure());
        }
        match self.tx.try_send(data.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "emulated device is gone",
            )),
        }
    }
}
