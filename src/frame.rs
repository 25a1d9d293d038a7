//! HTTP/2 frame codec (RFC 7540 Section 4.1).
//!
//! A [`Frame`] owns one contiguous byte region: the 9-byte header followed by
//! exactly `length` payload bytes.
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```

use std::collections::VecDeque;

use crate::error::FrameError;

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest value the 24-bit length field can carry.
pub const MAX_FRAME_LENGTH: u32 = 0x00FF_FFFF;

/// Largest 31-bit stream identifier.
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

const RESERVED_BIT: u8 = 0x80;

/// HTTP/2 frame flags
#[allow(dead_code)]
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 error codes (RFC 7540 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
}

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    /// Frames that only ever apply to the connection as a whole.
    pub fn is_connection_level(self) -> bool {
        matches!(self, FrameType::Settings | FrameType::Ping | FrameType::GoAway)
    }

    /// Frames that open (or continue) a header block.
    pub fn carries_header_block(self) -> bool {
        matches!(
            self,
            FrameType::Headers | FrameType::PushPromise | FrameType::Continuation
        )
    }
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        match value {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(other) => other,
        }
    }
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & MAX_STREAM_ID;

        Some(Self {
            length,
            frame_type: FrameType::from(data[3]),
            flags: data[4],
            stream_id,
        })
    }

    /// Encode into wire form. The reserved bit is always written as zero.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        assert!(self.length <= MAX_FRAME_LENGTH, "frame length exceeds 24 bits");

        let length = self.length.to_be_bytes();
        let stream_id = (self.stream_id & MAX_STREAM_ID).to_be_bytes();
        [
            length[1],
            length[2],
            length[3],
            u8::from(self.frame_type),
            self.flags,
            stream_id[0],
            stream_id[1],
            stream_id[2],
            stream_id[3],
        ]
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn is_padded(&self) -> bool {
        self.flags & flags::PADDED != 0
    }
}

/// One owned frame: header plus payload in a single region.
///
/// Accessors panic if the region is shorter than a frame header; that can
/// only happen through a programming error since every constructor
/// establishes `region.len() >= 9`.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("type", &self.frame_type())
            .field("flags", &self.flags())
            .field("stream_id", &self.stream_id())
            .field("length", &self.length())
            .finish()
    }
}

impl Frame {
    /// Build a frame from its header fields and payload.
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32, payload: &[u8]) -> Self {
        let mut frame = Self::with_capacity(payload.len());
        frame.set_type(frame_type);
        frame.set_flags(flags);
        frame.set_stream_id(stream_id);
        frame.set_payload(payload);
        frame
    }

    /// A zeroed frame whose payload region holds `payload_len` bytes.
    pub fn with_capacity(payload_len: usize) -> Self {
        assert!(
            payload_len <= MAX_FRAME_LENGTH as usize,
            "payload does not fit a 24-bit length"
        );

        let mut frame = Self {
            raw: vec![0; FRAME_HEADER_LEN + payload_len],
        };
        frame.write_length(payload_len as u32);
        frame
    }

    /// Adopt a complete wire frame.
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, FrameError> {
        if raw.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooShort { len: raw.len() });
        }

        let frame = Self { raw };
        let declared = frame.length();
        let actual = frame.raw.len() - FRAME_HEADER_LEN;
        if declared as usize != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(frame)
    }

    /// Region already validated by the assembler.
    pub(crate) fn from_assembled(raw: Vec<u8>) -> Self {
        debug_assert!(raw.len() >= FRAME_HEADER_LEN);
        Self { raw }
    }

    fn check_region(&self) {
        assert!(
            self.raw.len() >= FRAME_HEADER_LEN,
            "frame region is shorter than the frame header"
        );
    }

    fn write_length(&mut self, length: u32) {
        let bytes = length.to_be_bytes();
        self.raw[..3].copy_from_slice(&bytes[1..]);
    }

    pub fn length(&self) -> u32 {
        self.check_region();
        u32::from_be_bytes([0, self.raw[0], self.raw[1], self.raw[2]])
    }

    /// Shrink the payload to `length` bytes.
    ///
    /// Panics if `length` is larger than the current payload region.
    pub fn set_length(&mut self, length: u32) {
        self.check_region();
        let capacity = self.raw.len() - FRAME_HEADER_LEN;
        assert!(
            length as usize <= capacity,
            "length {length} exceeds payload capacity {capacity}"
        );

        self.write_length(length);
        self.raw.truncate(FRAME_HEADER_LEN + length as usize);
    }

    pub fn payload(&self) -> &[u8] {
        self.check_region();
        &self.raw[FRAME_HEADER_LEN..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.check_region();
        &mut self.raw[FRAME_HEADER_LEN..]
    }

    /// Copy `payload` in and set the length to match.
    ///
    /// Panics if `payload` is larger than the current payload region.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.set_length(payload.len() as u32);
        self.raw[FRAME_HEADER_LEN..].copy_from_slice(payload);
    }

    pub fn stream_id(&self) -> u32 {
        self.check_region();
        u32::from_be_bytes([self.raw[5], self.raw[6], self.raw[7], self.raw[8]]) & MAX_STREAM_ID
    }

    /// The reserved bit is cleared on every write.
    pub fn set_stream_id(&mut self, stream_id: u32) {
        self.check_region();
        self.raw[5..9].copy_from_slice(&stream_id.to_be_bytes());
        self.raw[5] &= !RESERVED_BIT;
    }

    pub fn flags(&self) -> u8 {
        self.check_region();
        self.raw[4]
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.check_region();
        self.raw[4] = flags;
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags() & flag != 0
    }

    pub fn frame_type(&self) -> FrameType {
        self.check_region();
        FrameType::from(self.raw[3])
    }

    pub fn set_type(&mut self, frame_type: FrameType) {
        self.check_region();
        self.raw[3] = frame_type.into();
    }

    /// Value of the reserved bit as received (0 or 1).
    pub fn reserved_bit(&self) -> u8 {
        self.check_region();
        (self.raw[5] & RESERVED_BIT) >> 7
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            length: self.length(),
            frame_type: self.frame_type(),
            flags: self.flags(),
            stream_id: self.stream_id(),
        }
    }

    /// The whole region, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }

    /// Payload with the pad-length byte and trailing padding removed.
    ///
    /// Applies to DATA, HEADERS and PUSH_PROMISE when PADDED is set; other
    /// frames return their payload unchanged.
    pub fn unpadded_payload(&self) -> Result<&[u8], FrameError> {
        let payload = self.payload();
        let frame_type = self.frame_type();
        let paddable = matches!(
            frame_type,
            FrameType::Data | FrameType::Headers | FrameType::PushPromise
        );
        if !paddable || !self.has_flag(flags::PADDED) {
            return Ok(payload);
        }

        let Some((&pad_length, rest)) = payload.split_first() else {
            return Err(FrameError::InvalidPadding { frame_type });
        };
        let pad_length = pad_length as usize;
        if pad_length > rest.len() {
            return Err(FrameError::InvalidPadding { frame_type });
        }
        Ok(&rest[..rest.len() - pad_length])
    }

    /// The header block fragment carried by a HEADERS, PUSH_PROMISE or
    /// CONTINUATION frame, with padding and priority fields stripped.
    pub fn header_fragment(&self) -> Result<&[u8], FrameError> {
        let fragment = self.unpadded_payload()?;
        let frame_type = self.frame_type();
        if frame_type == FrameType::Headers && self.has_flag(flags::PRIORITY) {
            // Stream dependency (4 bytes) + weight (1 byte)
            if fragment.len() < 5 {
                return Err(FrameError::InvalidPriority { frame_type });
            }
            return Ok(&fragment[5..]);
        }
        Ok(fragment)
    }
}

/// FIFO of owned frames.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Total payload bytes queued.
    pub fn payload_len(&self) -> usize {
        self.frames.iter().map(|f| f.payload().len()).sum()
    }
}
