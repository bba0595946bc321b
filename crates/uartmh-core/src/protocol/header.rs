//! Message header layout
//!
//! ```text
//! ┌───────────┬──────────┬─────┬──────┬─────────┬─────┬─────┬─────┬─────────┐
//! │ key_start │ msg_frag │ cmd │ scmd │ version │ out │ in  │ sum │ key_end │
//! │ 1B        │ 1B       │ 2B  │ 1B   │ 1B      │ 2B  │ 2B  │ 1B  │ 1B      │
//! └───────────┴──────────┴─────┴──────┴─────────┴─────┴─────┴─────┴─────────┘
//! ```
//!
//! `sum` is the XOR of every byte in front of it. An optional body follows
//! `key_end`.

/// Start sentinel
pub const KEY_START: u8 = 0xAA;

/// End sentinel
pub const KEY_END: u8 = 0xFB;

/// One field of the fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    /// Start sentinel, always 0xAA
    KeyStart,
    /// Fragment count, 0 for unfragmented frames
    MsgFrag,
    /// Command code, 2 bytes
    Cmd,
    /// Sub-command
    Scmd,
    /// Protocol version
    Version,
    /// Command-specific output word
    Out,
    /// Command-specific input word
    In,
    /// XOR of all preceding header bytes
    Sum,
    /// End sentinel, always 0xFB
    KeyEnd,
}

impl HeaderField {
    /// All fields in wire order
    pub const ALL: [HeaderField; 9] = [
        HeaderField::KeyStart,
        HeaderField::MsgFrag,
        HeaderField::Cmd,
        HeaderField::Scmd,
        HeaderField::Version,
        HeaderField::Out,
        HeaderField::In,
        HeaderField::Sum,
        HeaderField::KeyEnd,
    ];

    /// Width of the field in bytes
    pub const fn width(self) -> usize {
        match self {
            HeaderField::Cmd | HeaderField::Out | HeaderField::In => 2,
            _ => 1,
        }
    }

    /// Byte offset of the field within the header
    pub const fn offset(self) -> usize {
        let mut offset = 0;
        let mut i = 0;
        while i < Self::ALL.len() {
            if Self::ALL[i] as u8 == self as u8 {
                return offset;
            }
            offset += Self::ALL[i].width();
            i += 1;
        }
        offset
    }

    /// Byte range the field occupies
    pub const fn range(self) -> std::ops::Range<usize> {
        self.offset()..self.offset() + self.width()
    }
}

/// Total serialized header length
pub const HEADER_LEN: usize = {
    let mut len = 0;
    let mut i = 0;
    while i < HeaderField::ALL.len() {
        len += HeaderField::ALL[i].width();
        i += 1;
    }
    len
};
