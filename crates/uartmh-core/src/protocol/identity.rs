//! Device identity handshake
//!
//! Before normal commands, the host asks the firmware who it is with a
//! `mhconfig`/`manage` request over the management exchange. A good answer
//! is four identity bytes followed by `ACK\r\n`:
//!
//! ```text
//! 12 34 56 78 41 43 4B 0D 0A
//! └─ id ────┘ └─ "ACK\r\n" ─┘
//! ```
//!
//! The bytes are a little-endian `u32`; the low nibble of the first byte
//! tags the board type.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

use super::commands::{Command, SCMD_MANAGE};
use super::connection::Connection;
use super::frame::{Frame, FrameBuilder};
use super::response::{find, rfind};
use super::ProtocolError;

/// Identity reported by the firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Board type tag (low nibble of the first identity byte)
    pub device_type: u8,
    /// 32-bit device identity
    pub id: u32,
    /// `id` as 8 lowercase hex digits
    pub id_hex: String,
}

impl DeviceIdentity {
    /// Decode the four identity bytes
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        let id = u32::from_le_bytes(bytes);
        Self {
            device_type: bytes[0] & 0x0F,
            id,
            id_hex: format!("{:08x}", id),
        }
    }
}

/// The management request: `mhconfig`, scmd `manage`, out `[1, 0]`, one pad byte
pub fn manage_request_frame(version: u8) -> Result<Frame, ProtocolError> {
    FrameBuilder::new(Command::MhConfig, version)
        .scmd(SCMD_MANAGE)
        .out([0x01, 0x00])
        .body(&[0x00])
        .finish()
}

/// Extract the identity from a raw management response
pub fn parse_identity(raw: &[u8]) -> Result<DeviceIdentity, ProtocolError> {
    if find(raw, b"NAK").is_some() {
        return Err(ProtocolError::Rejected(raw.to_vec()));
    }
    let end = rfind(raw, b"ACK").ok_or_else(|| ProtocolError::Rejected(raw.to_vec()))?;
    let payload: [u8; 4] = raw[..end]
        .try_into()
        .map_err(|_| ProtocolError::InvalidIdentity { len: end })?;
    Ok(DeviceIdentity::from_bytes(payload))
}

/// How a caller keeps asking for the identity after failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub cooldown: Duration,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

/// Repeat [`Connection::identify`] until it succeeds or the policy runs out.
///
/// The last error is returned when attempts are exhausted.
pub fn identify_with_retry(
    conn: &Connection,
    policy: &RetryPolicy,
) -> Result<DeviceIdentity, ProtocolError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match conn.identify() {
            Ok(identity) => return Ok(identity),
            Err(e) => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(e);
                }
                tracing::info!(
                    target: "uartmh",
                    "no identity from device (attempt {}): {}; retrying in {:?}",
                    attempt,
                    e,
                    policy.cooldown
                );
                thread::sleep(policy.cooldown);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::HeaderField;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_identity() {
        let identity = parse_identity(b"\x12\x34\x56\x78ACK\r\n").unwrap();
        assert_eq!(identity.id, 0x7856_3412);
        assert_eq!(identity.id_hex, "78563412");
        assert_eq!(identity.device_type, 0x02);
    }

    #[test]
    fn test_parse_identity_pads_hex() {
        let identity = parse_identity(b"\x01\x00\x00\x00ACK\r\n").unwrap();
        assert_eq!(identity.id_hex, "00000001");
        assert_eq!(identity.device_type, 1);
    }

    #[test]
    fn test_parse_identity_rejects_nak() {
        assert!(matches!(
            parse_identity(b"NAK\r\n"),
            Err(ProtocolError::Rejected(_))
        ));
    }

    #[test]
    fn test_parse_identity_rejects_nak_anywhere() {
        // Still ends in ACK, so the management poll accepts it as complete
        let raw = b"\x00NAKACK\r\n";
        assert!(crate::protocol::response::manage_complete(raw));
        match parse_identity(raw) {
            Err(ProtocolError::Rejected(bytes)) => assert_eq!(bytes, raw.to_vec()),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_identity_wrong_length() {
        assert!(matches!(
            parse_identity(b"\x12\x34\x56ACK\r\n"),
            Err(ProtocolError::InvalidIdentity { len: 3 })
        ));
        assert!(matches!(
            parse_identity(b"\x12\x34\x56\x78\x9aACK\r\n"),
            Err(ProtocolError::InvalidIdentity { len: 5 })
        ));
    }

    #[test]
    fn test_manage_request_frame() {
        let frame = manage_request_frame(0).unwrap();
        assert_eq!(frame.len(), 13);
        assert_eq!(frame.msg_frag(), 0);
        assert_eq!(frame.field(HeaderField::Cmd), &[0x00, 0x00]);
        assert_eq!(frame.field(HeaderField::Scmd), &[0xFF]);
        assert_eq!(frame.field(HeaderField::Out), &[0x01, 0x00]);
        assert_eq!(frame.body(), &[0x00]);
        assert!(frame.is_valid());
    }
}
