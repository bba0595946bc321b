//! UART MessageHandler protocol
//!
//! Framing, transport and the two request/response exchanges spoken by the
//! Arduino UART MessageHandler firmware.
//!
//! Frames are a fixed 12-byte header plus an optional body. Frames that do
//! not fit the firmware's 64-byte serial FIFO are sent in 63-byte chunks,
//! each acknowledged before the next is written.

pub mod codec;
pub mod commands;
mod connection;
mod error;
pub mod frame;
pub mod header;
pub mod identity;
pub mod log;
pub mod response;
pub mod serial;
pub mod transport;

pub use codec::Endianness;
pub use commands::Command;
pub use connection::{Connection, Counters};
pub use error::ProtocolError;
pub use frame::{build_command_frame, CommandFields, Frame, FrameBuilder};
pub use header::{HeaderField, HEADER_LEN};
pub use identity::{identify_with_retry, DeviceIdentity, RetryPolicy};
pub use log::{LogSink, NullSink, TracingSink};
pub use serial::{list_ports, PortInfo};
pub use transport::{SerialTransport, Transport};

/// Default baud rate of the firmware
pub const DEFAULT_BAUD_RATE: u32 = 250_000;

/// Default per-read serial timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Largest chunk the firmware can take in one go (FIFO size minus one)
pub const FRAGMENT_SIZE: usize = 63;

/// `msg_frag` is a single byte
pub const MAX_FRAGMENTS: usize = 255;

/// Firmware protocol versions this host can talk to
pub const SUPPORTED_VERSIONS: &[u8] = &[0x00];
