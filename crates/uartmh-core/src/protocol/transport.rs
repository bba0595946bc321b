//! Byte transport
//!
//! [`Transport`] is the seam between the protocol engines and the wire. The
//! engines only ever see this trait, so anything that can move bytes (a real
//! serial port, a socket bridge, a scripted test double) can carry frames.

use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::serial::{clear_buffers, configure_port, open_port};
use super::ProtocolError;

/// Raw byte channel to a single device
pub trait Transport: Send {
    /// Whether the underlying handle is currently open
    fn is_open(&self) -> bool;

    /// Close the handle; errors are ignored
    fn close(&mut self);

    /// Hard close followed by a fresh open
    fn reset(&mut self) -> Result<(), ProtocolError>;

    /// Write every byte of `data`
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Flush pending output
    fn flush(&mut self) -> Result<(), ProtocolError>;

    /// Number of received bytes waiting to be read
    fn bytes_pending(&mut self) -> Result<usize, ProtocolError>;

    /// Read one byte; `None` if nothing arrived within the read timeout
    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError>;

    /// Read everything that is pending right now without waiting
    fn read_available(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        while self.bytes_pending()? > 0 {
            match self.read_byte()? {
                Some(b) => out.push(b),
                None => break,
            }
        }
        Ok(out)
    }
}

/// Transport over a local serial device
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `path` at `baud_rate` with `timeout` applied to every read
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ProtocolError> {
        let mut transport = Self {
            path: path.to_string(),
            baud_rate,
            timeout,
            port: None,
        };
        transport.port = Some(transport.open_port()?);
        Ok(transport)
    }

    fn open_port(&self) -> Result<Box<dyn SerialPort>, ProtocolError> {
        let mut port = open_port(&self.path, self.baud_rate, self.timeout)?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        Ok(port)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port
            .as_mut()
            .ok_or_else(|| ProtocolError::TransportIo(format!("{} is closed", self.path)))
    }
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        // Dropping the handle closes the file descriptor
        self.port = None;
    }

    fn reset(&mut self) -> Result<(), ProtocolError> {
        self.close();
        let port = self.open_port().map_err(|e| ProtocolError::TransportReset(e.to_string()))?;
        self.port = Some(port);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port()?
            .write_all(data)
            .map_err(|e| ProtocolError::TransportIo(e.to_string()))
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        self.port()?
            .flush()
            .map_err(|e| ProtocolError::TransportIo(e.to_string()))
    }

    fn bytes_pending(&mut self) -> Result<usize, ProtocolError> {
        self.port()?
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| ProtocolError::TransportIo(e.to_string()))
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        let mut buf = [0u8; 1];
        match self.port()?.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => Err(ProtocolError::TransportIo(e.to_string())),
        }
    }
}
