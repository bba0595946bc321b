//! Frame assembly
//!
//! A frame is the 12-byte header followed by an optional body. Frames are
//! put together with a [`FrameBuilder`] and sealed by [`FrameBuilder::finish`],
//! which fills in `msg_frag` and `sum`. A sealed [`Frame`] is read-only; to
//! change a field, turn it back into a builder and finish it again.

use super::codec::{checksum, overlay};
use super::header::{HeaderField, HEADER_LEN, KEY_END, KEY_START};
use super::{Command, ProtocolError, FRAGMENT_SIZE, MAX_FRAGMENTS};

/// Caller-populated header fields for a command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFields {
    /// Subcommand selector
    pub scmd: u8,
    /// `out` parameter bytes
    pub out: [u8; 2],
    /// `in` parameter bytes
    pub input: [u8; 2],
}

/// Builder for constructing frames
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl FrameBuilder {
    /// Header skeleton for `command`: sentinels, version and cmd set, all else zero
    pub fn new(command: Command, version: u8) -> Self {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[HeaderField::KeyStart.offset()] = KEY_START;
        bytes[HeaderField::KeyEnd.offset()] = KEY_END;
        bytes[HeaderField::Version.offset()] = version;
        overlay(&mut bytes, &command.bytes(), HeaderField::Cmd.offset());
        Self { bytes }
    }

    /// Look up `name` in the command table and start a frame for it
    pub fn for_command(name: &str, version: u8) -> Result<Self, ProtocolError> {
        Ok(Self::new(name.parse()?, version))
    }

    /// Set the subcommand byte
    pub fn scmd(mut self, scmd: u8) -> Self {
        self.bytes[HeaderField::Scmd.offset()] = scmd;
        self
    }

    /// Set the `out` parameter bytes
    pub fn out(mut self, out: [u8; 2]) -> Self {
        overlay(&mut self.bytes, &out, HeaderField::Out.offset());
        self
    }

    /// Set the `in` parameter bytes
    pub fn input(mut self, input: [u8; 2]) -> Self {
        overlay(&mut self.bytes, &input, HeaderField::In.offset());
        self
    }

    /// Apply all caller fields at once
    pub fn fields(self, fields: &CommandFields) -> Self {
        self.scmd(fields.scmd).out(fields.out).input(fields.input)
    }

    /// Overwrite an arbitrary header field
    pub fn field(mut self, field: HeaderField, data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > field.width() {
            return Err(ProtocolError::Encoding {
                value: data.len() as u64,
                width: field.width(),
            });
        }
        overlay(&mut self.bytes, data, field.offset());
        Ok(self)
    }

    /// Append body bytes after the header
    pub fn body(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(data);
        self
    }

    /// Compute `msg_frag` and `sum` and seal the frame
    pub fn finish(mut self) -> Result<Frame, ProtocolError> {
        let length = self.bytes.len();
        let fragments = fragment_count(length);
        if fragments > MAX_FRAGMENTS {
            return Err(ProtocolError::FragmentOverflow { length, fragments });
        }
        self.bytes[HeaderField::MsgFrag.offset()] = fragments as u8;

        let sum_at = HeaderField::Sum.offset();
        self.bytes[sum_at] = checksum(&self.bytes[..sum_at]);

        Ok(Frame { bytes: self.bytes })
    }
}

/// Number of chunks needed for a frame of `length` bytes; 0 when one write suffices
pub fn fragment_count(length: usize) -> usize {
    if length > FRAGMENT_SIZE {
        length.div_ceil(FRAGMENT_SIZE)
    } else {
        0
    }
}

/// A finalized, checksummed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total encoded size
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frames always carry a header, so this is never true
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fragment count from the header
    pub fn msg_frag(&self) -> u8 {
        self.bytes[HeaderField::MsgFrag.offset()]
    }

    /// Stored checksum byte
    pub fn sum(&self) -> u8 {
        self.bytes[HeaderField::Sum.offset()]
    }

    /// Bytes of a header field
    pub fn field(&self, field: HeaderField) -> &[u8] {
        &self.bytes[field.range()]
    }

    /// Body bytes following the header
    pub fn body(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// Sentinels in place and checksum matching
    pub fn is_valid(&self) -> bool {
        let sum_at = HeaderField::Sum.offset();
        self.bytes.len() >= HEADER_LEN
            && self.bytes[HeaderField::KeyStart.offset()] == KEY_START
            && self.bytes[HeaderField::KeyEnd.offset()] == KEY_END
            && self.bytes[sum_at] == checksum(&self.bytes[..sum_at])
    }

    /// Split into chunks of at most [`FRAGMENT_SIZE`] bytes, in wire order
    pub fn chunks(&self) -> std::slice::Chunks<'_, u8> {
        self.bytes.chunks(FRAGMENT_SIZE)
    }

    /// Reopen the frame for modification; it must be finished again before sending
    pub fn into_builder(self) -> FrameBuilder {
        FrameBuilder { bytes: self.bytes }
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Build and finish a frame for the named command in one go
pub fn build_command_frame(
    name: &str,
    version: u8,
    fields: &CommandFields,
    body: &[u8],
) -> Result<Frame, ProtocolError> {
    FrameBuilder::for_command(name, version)?
        .fields(fields)
        .body(body)
        .finish()
}
