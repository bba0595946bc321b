//! # UART MessageHandler Core Library
//!
//! Host-side protocol core for microcontrollers running the Arduino UART
//! MessageHandler firmware.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame construction (fixed header, LRC checksum, fragment count)
//! - Chunked transmission with per-chunk flow control
//! - ACK/NAK response collection
//! - The management handshake and device identity retrieval
//! - A serialized, self-healing serial connection
//!
//! Peripheral command sets (digital I/O, NeoPixel strips) are built on top
//! of [`protocol::Connection::build_command_frame`] and
//! [`protocol::Connection::send_message`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uartmh_core::{
//!     config::ConnectionConfig,
//!     protocol::{CommandFields, Connection, TracingSink},
//! };
//!
//! let conn = Connection::open(ConnectionConfig::new("/dev/ttyUSB0"), Arc::new(TracingSink))?;
//! let identity = conn.identify()?;
//! println!("device {}", identity.id_hex);
//!
//! let fields = CommandFields { scmd: 0x02, out: [0x01, 0x00], ..Default::default() };
//! let frame = conn.build_command_frame("digital", &fields, &[])?;
//! match conn.send_message(&frame)? {
//!     None => println!("ok"),
//!     Some(raw) => println!("data: {:?}", raw),
//! }
//! ```

pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConnectionConfig, Timings};
    pub use crate::protocol::{
        CommandFields, Connection, DeviceIdentity, Frame, FrameBuilder, LogSink, ProtocolError,
        TracingSink, Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
