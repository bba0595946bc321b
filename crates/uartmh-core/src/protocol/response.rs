//! Response markers and interpretation

use super::ProtocolError;

/// Positive acknowledgement line
pub const ACK: &[u8] = b"ACK\r\n";

/// Negative acknowledgement line
pub const NAK: &[u8] = b"NAK\r\n";

/// Chunk accepted, send the next one
pub const FRAGMENT_OK: &[u8] = b"CT";

/// Chunk corrupted, send it again
pub const FRAGMENT_BAD: &[u8] = b"FF";

/// Minimum response size worth reading; one ACK or NAK line
pub const MIN_RESPONSE_LEN: usize = 5;

/// Firmware verdict on one chunk of a fragmented send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkReply {
    /// "CT": move on to the next chunk
    Continue,
    /// "FF": resend this chunk
    Resend,
    /// Anything else
    Unrecognized,
}

impl ChunkReply {
    /// Classify a reply line by its prefix
    pub fn parse(line: &[u8]) -> Self {
        if line.starts_with(FRAGMENT_BAD) {
            ChunkReply::Resend
        } else if line.starts_with(FRAGMENT_OK) {
            ChunkReply::Continue
        } else {
            ChunkReply::Unrecognized
        }
    }
}

/// Turn an accumulated response into the caller-facing result.
///
/// A leading ACK is a bare success. An ACK further in means the command
/// returned data; the whole response, marker included, is handed back so
/// command modules can locate the marker themselves. Anything else is a
/// rejection.
pub fn interpret(response: Vec<u8>) -> Result<Option<Vec<u8>>, ProtocolError> {
    if response.starts_with(ACK) {
        Ok(None)
    } else if contains(&response, ACK) {
        Ok(Some(response))
    } else {
        Err(ProtocolError::Rejected(response))
    }
}

/// Management handshake is done once the tail is an ACK or the head a NAK
pub fn manage_complete(buf: &[u8]) -> bool {
    if buf.len() < MIN_RESPONSE_LEN {
        return false;
    }
    let tail = &buf[buf.len() - MIN_RESPONSE_LEN..];
    tail.starts_with(&ACK[..3]) || buf.starts_with(&NAK[..3])
}

/// Position of the first occurrence of `needle` in `haystack`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position of the last occurrence of `needle` in `haystack`
pub fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(haystack.len());
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
