//! Byte transport abstraction.
//!
//! The REPL controller is written against the [`Transport`] trait so the
//! same protocol code drives a native serial port and the emulated device
//! used in tests. Reads are bounded by a configurable timeout; a timeout is
//! reported as [`std::io::ErrorKind::TimedOut`] and is not a link failure.

use std::io::{self, Read, Write};
use std::time::Duration;

/// A write-only handle cloned off a transport.
///
/// Used to inject the interrupt byte from outside the worker thread while
/// the worker itself may be blocked in a read.
pub trait TransportWriter: Send {
    /// Write all bytes to the device.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// A bidirectional byte stream to a board.
pub trait Transport: Send {
    /// Read into `buf`, blocking up to the configured read timeout.
    ///
    /// A timeout yields `ErrorKind::TimedOut`; any other error means the
    /// link itself failed.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all bytes to the device.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Set the timeout applied to subsequent reads.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any buffered input that has not been read yet.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Pulse the control lines to reset the board, if the transport
    /// supports it. A no-op is a valid implementation.
    fn reset_pulse(&mut self) -> io::Result<()>;

    /// Clone an independent writer for out-of-band interrupt injection.
    fn try_clone_writer(&self) -> io::Result<Box<dyn TransportWriter>>;
}

// ============================================================================
// Serial implementation
// ============================================================================

fn serial_io(err: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// [`Transport`] implementation over a native serial port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open the named port at the given baud rate.
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e.to_string()))?;
        Ok(SerialTransport {
            port,
            name: port_name.to_string(),
        })
    }

    /// The port name this transport was opened on.
    pub fn port_name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            // Some platforms report a timeout as a zero-length read; the
            // controller treats Ok(0) as a closed link, so normalize it.
            Ok(0) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
            Ok(n) => Ok(n),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(serial_io)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(serial_io)
    }

    fn reset_pulse(&mut self) -> io::Result<()> {
        // Classic DTR/RTS reset dance; harmless on boards that ignore the
        // control lines.
        self.port
            .write_data_terminal_ready(false)
            .map_err(serial_io)?;
        self.port.write_request_to_send(true).map_err(serial_io)?;
        std::thread::sleep(Duration::from_millis(100));
        self.port.write_request_to_send(false).map_err(serial_io)?;
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    fn try_clone_writer(&self) -> io::Result<Box<dyn TransportWriter>> {
        let clone = self.port.try_clone().map_err(serial_io)?;
        Ok(Box::new(SerialWriter { port: clone }))
    }
}

struct SerialWriter {
    port: Box<dyn serialport::SerialPort>,
}

impl TransportWriter for SerialWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }
}
