//! Connection management
//!
//! A [`Connection`] owns the transport to one device and serializes every
//! exchange on it. Two exchanges exist:
//!
//! - [`Connection::send_message`]: normal commands. Frames longer than one
//!   chunk are written chunk by chunk, each chunk paced by the firmware's
//!   "CT"/"FF" replies, then the ACK/NAK response is collected.
//! - [`Connection::send_manage_message`]: the management handshake used to
//!   fetch the device identity. One write, then raw polling until the buffer
//!   ends in ACK or starts with NAK.
//!
//! Both hold the connection lock for the whole exchange, so responses from
//! concurrent callers never interleave on the wire.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::Level;

use super::frame::{build_command_frame, CommandFields, Frame};
use super::identity::{manage_request_frame, parse_identity, DeviceIdentity};
use super::log::LogSink;
use super::response::{interpret, manage_complete, ChunkReply, MIN_RESPONSE_LEN};
use super::serial::{list_ports, PortInfo};
use super::transport::{SerialTransport, Transport};
use super::ProtocolError;
use crate::config::ConnectionConfig;

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Bytes written, chunk retransmissions excluded
    pub tx_bytes: u64,
    /// Response bytes read
    pub rx_bytes: u64,
    /// Frames sent
    pub tx_messages: u64,
    /// Responses received
    pub rx_messages: u64,
}

/// State behind the connection lock
struct Link {
    transport: Box<dyn Transport>,
    counters: Counters,
}

impl Link {
    fn record_tx(&mut self, bytes: usize) {
        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(bytes as u64);
        self.counters.tx_messages = self.counters.tx_messages.saturating_add(1);
    }

    fn record_rx(&mut self, bytes: usize) {
        self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(bytes as u64);
        self.counters.rx_messages = self.counters.rx_messages.saturating_add(1);
    }
}

/// Connection to one MessageHandler device
///
/// Only one `Connection` should exist per device path; two handles on the
/// same port will steal each other's bytes.
pub struct Connection {
    config: ConnectionConfig,
    link: Mutex<Link>,
    identity: OnceLock<DeviceIdentity>,
    sink: Arc<dyn LogSink>,
}

impl Connection {
    /// Open the serial device named in `config`, logging through `sink`
    ///
    /// Pass `Arc::new(TracingSink)` to keep log output on `tracing`.
    pub fn open(config: ConnectionConfig, sink: Arc<dyn LogSink>) -> Result<Self, ProtocolError> {
        config.validate()?;
        let transport =
            SerialTransport::open(&config.port_name, config.baud_rate, config.read_timeout())?;
        Ok(Self::with_transport(config, Box::new(transport), sink))
    }

    /// Wrap an already constructed transport
    pub fn with_transport(
        config: ConnectionConfig,
        transport: Box<dyn Transport>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            link: Mutex::new(Link {
                transport,
                counters: Counters::default(),
            }),
            identity: OnceLock::new(),
            sink,
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// Configuration this connection was built with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Protocol version stamped into outgoing headers
    pub fn version(&self) -> u8 {
        self.config.version
    }

    /// Whether the transport is currently open
    pub fn is_open(&self) -> bool {
        self.lock().transport.is_open()
    }

    /// Close the transport; the next exchange reopens it
    pub fn close(&self) {
        self.lock().transport.close();
    }

    /// Hard close and reopen, for callers that detect a wedged link
    pub fn reset(&self) -> Result<(), ProtocolError> {
        let mut link = self.lock();
        self.reset_link(&mut link)
    }

    /// Get cumulative tx/rx counters
    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// Cached device identity, once [`Connection::identify`] has succeeded
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.get()
    }

    /// Build and finish a command frame using this connection's protocol version
    pub fn build_command_frame(
        &self,
        name: &str,
        fields: &CommandFields,
        body: &[u8],
    ) -> Result<Frame, ProtocolError> {
        build_command_frame(name, self.version(), fields, body)
    }

    /// Send a command frame and wait for the firmware's verdict.
    ///
    /// Returns `Ok(None)` for a plain ACK, `Ok(Some(raw))` when the
    /// response carries data ahead of its ACK, and
    /// [`ProtocolError::Rejected`] for NAK or anything unrecognized.
    pub fn send_message(&self, frame: &Frame) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut link = self.lock();
        self.ensure_open(&mut link)?;

        let bytes = frame.as_bytes();
        if frame.msg_frag() > 0 {
            self.send_fragmented(&mut link, frame)?;
        } else {
            self.log(Level::DEBUG, format_args!("sending {} bytes: {:02x?}", bytes.len(), bytes));
            link.transport
                .write(bytes)
                .map_err(|e| ProtocolError::Write(e.to_string()))?;
        }
        link.transport
            .flush()
            .map_err(|e| ProtocolError::Write(e.to_string()))?;
        link.record_tx(bytes.len());

        let response = self.collect_response(&mut link)?;
        link.record_rx(response.len());
        drop(link);

        self.log(
            Level::DEBUG,
            format_args!("response: {:?}", String::from_utf8_lossy(&response)),
        );
        interpret(response)
    }

    /// Send a management frame and return whatever the firmware answered.
    ///
    /// Management frames are small and never fragmented.
    pub fn send_manage_message(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        let timings = self.config.timings;
        let mut link = self.lock();
        self.ensure_open(&mut link)?;

        let bytes = frame.as_bytes();
        if frame.msg_frag() > 0 {
            self.log(
                Level::WARN,
                format_args!("management frame of {} bytes sent unfragmented", bytes.len()),
            );
        }
        self.log(Level::DEBUG, format_args!("manage: sending {:02x?}", bytes));
        link.transport
            .write(bytes)
            .map_err(|e| ProtocolError::Write(e.to_string()))?;
        link.transport
            .flush()
            .map_err(|e| ProtocolError::Write(e.to_string()))?;
        link.record_tx(bytes.len());

        let deadline = Instant::now() + timings.manage_first_timeout;
        if !wait_for_pending(link.transport.as_mut(), 1, deadline, timings.poll_interval)
            .map_err(read_error)?
        {
            self.log(Level::WARN, format_args!("manage: no response"));
            return Err(ProtocolError::FirstResponseTimeout);
        }

        let deadline = Instant::now() + timings.manage_second_timeout;
        let mut buf = Vec::new();
        loop {
            buf.extend(link.transport.read_available().map_err(read_error)?);
            if manage_complete(&buf) {
                break;
            }
            if Instant::now() >= deadline {
                self.log(
                    Level::WARN,
                    format_args!("manage: incomplete response {:02x?}", buf),
                );
                return Err(ProtocolError::SecondResponseTimeout { received: buf.len() });
            }
            thread::sleep(timings.poll_interval);
        }
        link.record_rx(buf.len());

        Ok(buf)
    }

    /// Run the identity handshake once and cache the result.
    ///
    /// Returns the cached identity without touching the wire if one is
    /// already known.
    pub fn identify(&self) -> Result<DeviceIdentity, ProtocolError> {
        if let Some(identity) = self.identity.get() {
            return Ok(identity.clone());
        }

        let frame = manage_request_frame(self.version())?;
        let raw = self.send_manage_message(&frame)?;
        let identity = parse_identity(&raw)?;
        self.log(
            Level::INFO,
            format_args!("device {} (type {:#x})", identity.id_hex, identity.device_type),
        );
        Ok(self.identity.get_or_init(|| identity).clone())
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        // A panic mid-exchange must not wedge the port for everyone else
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, level: Level, message: std::fmt::Arguments<'_>) {
        self.sink.log(level, message);
    }

    fn reset_link(&self, link: &mut Link) -> Result<(), ProtocolError> {
        link.transport.reset().map_err(|e| {
            self.log(Level::ERROR, format_args!("serial reset failed: {}", e));
            if matches!(e, ProtocolError::TransportReset(_)) {
                e
            } else {
                ProtocolError::TransportReset(e.to_string())
            }
        })
    }

    fn ensure_open(&self, link: &mut Link) -> Result<(), ProtocolError> {
        if link.transport.is_open() {
            return Ok(());
        }
        self.log(Level::INFO, format_args!("transport closed, reopening"));
        self.reset_link(link)
    }

    /// Chunked send; each chunk must be answered with "CT" before its deadline
    fn send_fragmented(&self, link: &mut Link, frame: &Frame) -> Result<(), ProtocolError> {
        let timings = self.config.timings;
        self.log(
            Level::DEBUG,
            format_args!("sending {} bytes in {} fragments", frame.len(), frame.msg_frag()),
        );

        for (index, chunk) in frame.chunks().enumerate() {
            let deadline = Instant::now() + timings.chunk_timeout;
            loop {
                if Instant::now() >= deadline {
                    self.log(Level::WARN, format_args!("chunk {} timed out", index));
                    return Err(ProtocolError::ChunkTimeout { chunk: index });
                }

                for byte in chunk {
                    link.transport
                        .write(std::slice::from_ref(byte))
                        .map_err(|e| ProtocolError::ChunkWrite {
                            chunk: index,
                            reason: e.to_string(),
                        })?;
                }

                let line = read_line(link.transport.as_mut(), deadline, timings.poll_interval)
                    .map_err(read_error)?;
                match ChunkReply::parse(&line) {
                    ChunkReply::Continue => break,
                    ChunkReply::Resend => {
                        self.log(Level::WARN, format_args!("chunk {} rejected, resending", index));
                        thread::sleep(timings.fragment_retry_delay);
                    }
                    ChunkReply::Unrecognized if line.is_empty() => {}
                    ChunkReply::Unrecognized => {
                        self.log(
                            Level::WARN,
                            format_args!(
                                "unexpected reply to chunk {}: {:?}",
                                index,
                                String::from_utf8_lossy(&line)
                            ),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait for the first response, then keep reading lines while more is pending
    fn collect_response(&self, link: &mut Link) -> Result<Vec<u8>, ProtocolError> {
        let timings = self.config.timings;
        let read_timeout = self.config.read_timeout();
        let transport = link.transport.as_mut();

        let deadline = Instant::now() + timings.response_timeout;
        if !wait_for_pending(transport, MIN_RESPONSE_LEN, deadline, timings.poll_interval)
            .map_err(read_error)?
        {
            self.log(Level::WARN, format_args!("response timed out"));
            return Err(ProtocolError::ResponseTimeout);
        }

        let mut response = read_line(transport, Instant::now() + read_timeout, timings.poll_interval)
            .map_err(read_error)?;
        while transport.bytes_pending().map_err(read_error)? > 0 {
            thread::sleep(timings.line_idle);
            let line = read_line(transport, Instant::now() + read_timeout, timings.poll_interval)
                .map_err(read_error)?;
            self.log(Level::DEBUG, format_args!("read another line ({} bytes)", line.len()));
            response.extend(line);
        }
        Ok(response)
    }
}

fn read_error(e: ProtocolError) -> ProtocolError {
    if matches!(e, ProtocolError::Read(_)) {
        e
    } else {
        ProtocolError::Read(e.to_string())
    }
}

/// Poll until at least `min` bytes are pending; false if `deadline` passes first
fn wait_for_pending(
    transport: &mut dyn Transport,
    min: usize,
    deadline: Instant,
    poll: Duration,
) -> Result<bool, ProtocolError> {
    loop {
        if transport.bytes_pending()? >= min {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(poll);
    }
}

/// Read up to and including the next '\n'; returns the partial line at the deadline
fn read_line(
    transport: &mut dyn Transport,
    deadline: Instant,
    poll: Duration,
) -> Result<Vec<u8>, ProtocolError> {
    let mut line = Vec::new();
    loop {
        if transport.bytes_pending()? > 0 {
            if let Some(byte) = transport.read_byte()? {
                line.push(byte);
                if byte == b'\n' {
                    return Ok(line);
                }
                continue;
            }
        }
        if Instant::now() >= deadline {
            return Ok(line);
        }
        thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::HeaderField;
    use crate::protocol::log::NullSink;
    use std::collections::VecDeque;

    /// Transport that replays a fixed script of inbound bytes
    struct Scripted {
        inbound: VecDeque<u8>,
        written: Vec<u8>,
        open: bool,
        reopen_fails: bool,
    }

    impl Scripted {
        fn new(inbound: &[u8]) -> Self {
            Self {
                inbound: inbound.iter().copied().collect(),
                written: Vec::new(),
                open: true,
                reopen_fails: false,
            }
        }
    }

    impl Transport for Scripted {
        fn is_open(&self) -> bool {
            self.open
        }
        fn close(&mut self) {
            self.open = false;
        }
        fn reset(&mut self) -> Result<(), ProtocolError> {
            if self.reopen_fails {
                return Err(ProtocolError::TransportOpen {
                    path: "scripted".into(),
                    reason: "no such device".into(),
                });
            }
            self.open = true;
            Ok(())
        }
        fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
            self.written.extend_from_slice(data);
            Ok(())
        }
        fn flush(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn bytes_pending(&mut self) -> Result<usize, ProtocolError> {
            Ok(self.inbound.len())
        }
        fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
            Ok(self.inbound.pop_front())
        }
    }

    fn fast_config() -> ConnectionConfig {
        let mut config = ConnectionConfig::new("scripted");
        config.timeout_ms = 50;
        config.timings.response_timeout = Duration::from_millis(50);
        config.timings.line_idle = Duration::from_millis(1);
        config.timings.manage_first_timeout = Duration::from_millis(50);
        config.timings.manage_second_timeout = Duration::from_millis(50);
        config
    }

    fn connect(transport: Scripted) -> Connection {
        Connection::with_transport(fast_config(), Box::new(transport), Arc::new(NullSink))
    }

    fn digital_frame() -> Frame {
        build_command_frame("digital", 0, &CommandFields::default(), &[]).unwrap()
    }

    #[test]
    fn test_read_line_stops_at_newline() {
        let mut t = Scripted::new(b"CT\r\nACK\r\n");
        let deadline = Instant::now() + Duration::from_millis(10);
        let line = read_line(&mut t, deadline, Duration::from_millis(1)).unwrap();
        assert_eq!(line, b"CT\r\n".to_vec());
        assert_eq!(t.inbound.len(), 5);
    }

    #[test]
    fn test_read_line_returns_partial_at_deadline() {
        let mut t = Scripted::new(b"AC");
        let deadline = Instant::now() + Duration::from_millis(5);
        let line = read_line(&mut t, deadline, Duration::from_millis(1)).unwrap();
        assert_eq!(line, b"AC".to_vec());
    }

    #[test]
    fn test_wait_for_pending() {
        let mut t = Scripted::new(b"ACK");
        let deadline = Instant::now() + Duration::from_millis(5);
        assert!(!wait_for_pending(&mut t, 5, deadline, Duration::from_millis(1)).unwrap());
        assert!(wait_for_pending(&mut t, 3, deadline, Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_multiline_response_accumulates() {
        let conn = connect(Scripted::new(b"0x01\r\n0x02\r\nACK\r\n"));
        let result = conn.send_message(&digital_frame()).unwrap();
        assert_eq!(result, Some(b"0x01\r\n0x02\r\nACK\r\n".to_vec()));
    }

    #[test]
    fn test_closed_transport_is_reopened() {
        let mut transport = Scripted::new(b"ACK\r\n");
        transport.open = false;
        let conn = connect(transport);
        assert!(!conn.is_open());
        assert_eq!(conn.send_message(&digital_frame()).unwrap(), None);
        assert!(conn.is_open());
    }

    #[test]
    fn test_failed_reopen_is_reset_error() {
        let mut transport = Scripted::new(b"");
        transport.open = false;
        transport.reopen_fails = true;
        let conn = connect(transport);
        assert!(matches!(
            conn.send_message(&digital_frame()),
            Err(ProtocolError::TransportReset(_))
        ));
        assert!(matches!(
            conn.send_manage_message(&digital_frame()),
            Err(ProtocolError::TransportReset(_))
        ));
    }

    #[test]
    fn test_counters() {
        let conn = connect(Scripted::new(b"ACK\r\n"));
        conn.send_message(&digital_frame()).unwrap();
        let counters = conn.counters();
        assert_eq!(counters.tx_bytes, 12);
        assert_eq!(counters.tx_messages, 1);
        assert_eq!(counters.rx_bytes, 5);
        assert_eq!(counters.rx_messages, 1);
    }

    #[test]
    fn test_identify_caches() {
        let conn = connect(Scripted::new(b"\x12\x34\x56\x78ACK\r\n"));
        assert!(conn.identity().is_none());
        let identity = conn.identify().unwrap();
        assert_eq!(identity.id, 0x7856_3412);
        // Second call is served from the cache; the script is exhausted
        assert_eq!(conn.identify().unwrap(), identity);
        assert_eq!(conn.identity(), Some(&identity));
    }

    #[test]
    fn test_headers_use_configured_version() {
        let mut config = fast_config();
        config.version = 0x00;
        let conn =
            Connection::with_transport(config, Box::new(Scripted::new(b"")), Arc::new(NullSink));
        assert_eq!(conn.version(), 0x00);
        assert_eq!(conn.config().port_name, "scripted");
        assert_eq!(conn.config().timings.line_idle, Duration::from_millis(1));
        let frame = conn
            .build_command_frame("digital", &CommandFields::default(), &[])
            .unwrap();
        assert_eq!(frame.field(HeaderField::Version), &[conn.version()]);
    }
}
