//! Frame encoding and decoding for the host link.
//!
//! Frame format:
//! - START (1 byte): 0x7E synchronization byte
//! - TYPE (1 byte): message type identifier
//! - SEQ (1 byte): sender sequence number, wraps at 255
//! - LENGTH (1 byte): payload length (0-250)
//! - PAYLOAD (0-250 bytes): postcard-encoded message body
//! - CRC (1 byte): CRC-8 (poly 0x07) over TYPE, SEQ, LENGTH and PAYLOAD

use heapless::Vec;

/// Frame synchronization byte
pub const FRAME_START: u8 = 0x7E;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 250;

/// Header bytes preceding the payload (START + TYPE + SEQ + LENGTH)
const HEADER_SIZE: usize = 4;

/// Maximum complete frame size (header + payload + CRC)
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + 1;

/// Errors that can occur during frame parsing or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload exceeds maximum allowed size
    PayloadTooLarge,
    /// CRC mismatch
    InvalidCrc,
    /// Declared length is out of range
    InvalidLength,
    /// Unknown message type for this direction
    UnknownType(u8),
    /// Buffer too small for encoding
    BufferTooSmall,
    /// Message body could not be serialized
    Encode,
    /// Message body could not be deserialized
    Decode,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::PayloadTooLarge => write!(f, "payload exceeds {} bytes", MAX_PAYLOAD_SIZE),
            FrameError::InvalidCrc => write!(f, "CRC mismatch"),
            FrameError::InvalidLength => write!(f, "invalid length byte"),
            FrameError::UnknownType(t) => write!(f, "unknown message type 0x{:02x}", t),
            FrameError::BufferTooSmall => write!(f, "output buffer too small"),
            FrameError::Encode => write!(f, "message encoding failed"),
            FrameError::Decode => write!(f, "message decoding failed"),
        }
    }
}

/// CRC-8 with polynomial 0x07, initial value 0x00
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| crc8_step(crc, byte))
}

fn crc8_step(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ 0x07
        } else {
            crc << 1
        };
    }
    crc
}

/// A parsed or constructed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type identifier
    pub msg_type: u8,
    /// Sequence number assigned by the sender
    pub seq: u8,
    /// Payload data
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl Frame {
    /// Create a new frame with the given message type, sequence and payload
    pub fn new(msg_type: u8, seq: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = Vec::from_slice(payload).map_err(|_| FrameError::PayloadTooLarge)?;
        Ok(Self {
            msg_type,
            seq,
            payload,
        })
    }

    fn crc(&self) -> u8 {
        let header = [self.msg_type, self.seq, self.payload.len() as u8];
        self.payload
            .iter()
            .fold(crc8(&header), |crc, &byte| crc8_step(crc, byte))
    }

    /// Length of this frame once encoded
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + 1
    }

    /// Encode this frame into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let frame_len = self.encoded_len();
        if buffer.len() < frame_len {
            return Err(FrameError::BufferTooSmall);
        }

        buffer[0] = FRAME_START;
        buffer[1] = self.msg_type;
        buffer[2] = self.seq;
        buffer[3] = self.payload.len() as u8;
        buffer[HEADER_SIZE..HEADER_SIZE + self.payload.len()].copy_from_slice(&self.payload);
        buffer[frame_len - 1] = self.crc();

        Ok(frame_len)
    }

    /// Encode this frame into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_FRAME_SIZE>, FrameError> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buffer)?;
        Vec::from_slice(&buffer[..len]).map_err(|_| FrameError::BufferTooSmall)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Start,
    Type,
    Seq,
    Length,
    Payload,
    Crc,
}

/// Byte-at-a-time frame parser
///
/// Bytes outside a frame are skipped until the next START byte, so the
/// parser resynchronizes by itself after line noise or a dropped byte.
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParseState,
    msg_type: u8,
    seq: u8,
    expected_len: usize,
    buffer: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Create a new frame parser
    pub fn new() -> Self {
        Self {
            state: ParseState::Start,
            msg_type: 0,
            seq: 0,
            expected_len: 0,
            buffer: Vec::new(),
        }
    }

    /// Discard any partially received frame
    pub fn reset(&mut self) {
        self.state = ParseState::Start;
        self.buffer.clear();
        self.expected_len = 0;
    }

    /// Feed a single byte to the parser
    ///
    /// Returns `Ok(Some(frame))` when a complete valid frame is parsed,
    /// `Ok(None)` when more bytes are needed, or `Err` on a corrupt frame.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        match self.state {
            ParseState::Start => {
                if byte == FRAME_START {
                    self.state = ParseState::Type;
                }
            }
            ParseState::Type => {
                self.msg_type = byte;
                self.state = ParseState::Seq;
            }
            ParseState::Seq => {
                self.seq = byte;
                self.state = ParseState::Length;
            }
            ParseState::Length => {
                if byte as usize > MAX_PAYLOAD_SIZE {
                    self.reset();
                    return Err(FrameError::InvalidLength);
                }
                self.expected_len = byte as usize;
                self.buffer.clear();
                self.state = if self.expected_len == 0 {
                    ParseState::Crc
                } else {
                    ParseState::Payload
                };
            }
            ParseState::Payload => {
                // Capacity is guaranteed by the length check above
                let _ = self.buffer.push(byte);
                if self.buffer.len() == self.expected_len {
                    self.state = ParseState::Crc;
                }
            }
            ParseState::Crc => {
                let frame = Frame {
                    msg_type: self.msg_type,
                    seq: self.seq,
                    payload: core::mem::take(&mut self.buffer),
                };
                self.reset();
                if frame.crc() != byte {
                    return Err(FrameError::InvalidCrc);
                }
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Feed multiple bytes to the parser
    ///
    /// Returns the first complete frame found together with the number of
    /// bytes consumed, so the caller can continue with the remainder.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<(Option<Frame>, usize), FrameError> {
        for (i, &byte) in bytes.iter().enumerate() {
            if let Some(frame) = self.feed(byte)? {
                return Ok((Some(frame), i + 1));
            }
        }
        Ok((None, bytes.len()))
    }
}
