//! Protocol errors

use thiserror::Error;

/// Errors that can occur while building frames or talking to the firmware
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Invalid connection settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Config file could not be read or parsed
    #[error("Config file error: {0}")]
    Config(String),

    /// Serial device could not be opened
    #[error("Unable to open serial device {path}: {reason}")]
    TransportOpen {
        /// Device path
        path: String,
        /// Why the open failed
        reason: String,
    },

    /// Reopening the transport failed
    #[error("Serial reset failed: {0}")]
    TransportReset(String),

    /// Raw transport I/O failure
    #[error("Serial I/O error: {0}")]
    TransportIo(String),

    /// Integer does not fit the field width
    #[error("Value {value:#x} does not fit in {width} byte(s)")]
    Encoding {
        /// Value being encoded
        value: u64,
        /// Field width in bytes
        width: usize,
    },

    /// Command name not in the command table
    #[error("Unknown command: '{0}'")]
    UnknownCommand(String),

    /// Frame too long to express its fragment count
    #[error("Frame of {length} bytes needs {fragments} fragments (max 255)")]
    FragmentOverflow {
        /// Whole frame length
        length: usize,
        /// Fragments it would need
        fragments: usize,
    },

    /// Writing a fragment failed
    #[error("Failed to write chunk {chunk}: {reason}")]
    ChunkWrite {
        /// Zero-based chunk index
        chunk: usize,
        /// Underlying failure
        reason: String,
    },

    /// A fragment got no "CT" before its deadline
    #[error("Chunk {chunk} was not acknowledged before the deadline")]
    ChunkTimeout {
        /// Zero-based chunk index
        chunk: usize,
    },

    /// Writing an unfragmented frame failed
    #[error("Failed to write message: {0}")]
    Write(String),

    /// No response arrived in time
    #[error("Timed out waiting for a response")]
    ResponseTimeout,

    /// Reading the response failed
    #[error("Failed to read response: {0}")]
    Read(String),

    /// Management exchange got no bytes at all
    #[error("Timed out waiting for the first management response byte")]
    FirstResponseTimeout,

    /// Management response started but never completed
    #[error("Management response incomplete after {received} bytes")]
    SecondResponseTimeout {
        /// Bytes received before giving up
        received: usize,
    },

    /// NAK or an unrecognized response, with the raw bytes
    #[error("Device rejected message: {:?}", String::from_utf8_lossy(.0))]
    Rejected(Vec<u8>),

    /// Identity payload was not 4 bytes
    #[error("Identity response carried {len} bytes, expected 4")]
    InvalidIdentity {
        /// Payload length actually received
        len: usize,
    },
}

impl ProtocolError {
    /// True for deadline expiries; the logical operation may simply be retried
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProtocolError::ChunkTimeout { .. }
                | ProtocolError::ResponseTimeout
                | ProtocolError::FirstResponseTimeout
                | ProtocolError::SecondResponseTimeout { .. }
        )
    }

    /// True for device-level failures where a transport reset is the way out
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::TransportOpen { .. }
                | ProtocolError::TransportReset(_)
                | ProtocolError::TransportIo(_)
                | ProtocolError::ChunkWrite { .. }
                | ProtocolError::Write(_)
                | ProtocolError::Read(_)
        )
    }
}
