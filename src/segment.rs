//! Wire-format definitions for STCP segments.
//!
//! Every message exchanged between a client and a server TCB is a
//! [`Segment`]. This module owns the binary layout and the checksum; no I/O
//! happens here. Framing onto a byte stream lives in [`crate::codec`].
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**, including the 16-bit words
//! summed by the checksum.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Source Port                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Destination Port                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Length             |             Type              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Receive Window         |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A DATAACK carries the receiver's next expected byte offset in the
//! sequence-number field.

use std::fmt;

use crate::error::CodecError;
use crate::Port;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Largest payload a segment may carry: a 1500-byte overlay MTU minus the
/// 12-byte overlay header and this header.
pub const MAX_SEG_LEN: usize = 1464;

// Byte offsets of each field within the serialised header.
const OFF_SRC_PORT: usize = 0;
const OFF_DEST_PORT: usize = 4;
const OFF_SEQ: usize = 8;
const OFF_ACK: usize = 12;
pub(crate) const OFF_LENGTH: usize = 16;
const OFF_TYPE: usize = 18;
const OFF_RCV_WIN: usize = 20;
const OFF_CHECKSUM: usize = 22;

/// Segment type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SegmentType {
    Syn = 0,
    SynAck = 1,
    Fin = 2,
    FinAck = 3,
    Data = 4,
    DataAck = 5,
}

impl SegmentType {
    pub fn from_u16(value: u16) -> Result<Self, CodecError> {
        Ok(match value {
            0 => Self::Syn,
            1 => Self::SynAck,
            2 => Self::Fin,
            3 => Self::FinAck,
            4 => Self::Data,
            5 => Self::DataAck,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syn => "SYN",
            Self::SynAck => "SYNACK",
            Self::Fin => "FIN",
            Self::FinAck => "FINACK",
            Self::Data => "DATA",
            Self::DataAck => "DATAACK",
        };
        f.write_str(name)
    }
}

/// Fixed-size segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub src_port: Port,
    pub dest_port: Port,
    /// Byte offset of the first payload byte (DATA) or the next expected
    /// offset (DATAACK).
    pub seq_num: u32,
    pub ack_num: u32,
    /// Payload length. Computed on encode, validated on decode.
    pub length: u16,
    pub seg_type: SegmentType,
    pub rcv_win: u16,
    /// One's-complement checksum. Computed on encode, verified on decode.
    pub checksum: u16,
}

/// A complete segment: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    fn with(seg_type: SegmentType, src_port: Port, dest_port: Port, seq_num: u32) -> Self {
        Self {
            header: Header {
                src_port,
                dest_port,
                seq_num,
                ack_num: 0,
                length: 0,
                seg_type,
                rcv_win: 0,
                checksum: 0,
            },
            payload: Vec::new(),
        }
    }

    /// A payload-less SYN, SYNACK, FIN or FINACK.
    pub fn control(seg_type: SegmentType, src_port: Port, dest_port: Port) -> Self {
        Self::with(seg_type, src_port, dest_port, 0)
    }

    /// A DATA segment starting at byte offset `seq_num`.
    pub fn data(src_port: Port, dest_port: Port, seq_num: u32, payload: Vec<u8>) -> Self {
        let mut seg = Self::with(SegmentType::Data, src_port, dest_port, seq_num);
        seg.header.length = payload.len() as u16;
        seg.payload = payload;
        seg
    }

    /// A cumulative acknowledgement announcing `expected` as the next
    /// byte offset the receiver wants.
    pub fn data_ack(src_port: Port, dest_port: Port, expected: u32) -> Self {
        Self::with(SegmentType::DataAck, src_port, dest_port, expected)
    }

    pub fn seg_type(&self) -> SegmentType {
        self.header.seg_type
    }

    /// Serialise into a newly allocated buffer with length and checksum
    /// filled in. Stored values of those two fields are ignored.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let len = self.payload.len();
        if len > MAX_SEG_LEN {
            return Err(CodecError::PayloadTooLong {
                len,
                max: MAX_SEG_LEN,
            });
        }

        let h = &self.header;
        let mut buf = vec![0u8; HEADER_LEN + len];
        buf[OFF_SRC_PORT..OFF_SRC_PORT + 4].copy_from_slice(&h.src_port.to_be_bytes());
        buf[OFF_DEST_PORT..OFF_DEST_PORT + 4].copy_from_slice(&h.dest_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&h.seq_num.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&h.ack_num.to_be_bytes());
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&(len as u16).to_be_bytes());
        buf[OFF_TYPE..OFF_TYPE + 2].copy_from_slice(&(h.seg_type as u16).to_be_bytes());
        buf[OFF_RCV_WIN..OFF_RCV_WIN + 2].copy_from_slice(&h.rcv_win.to_be_bytes());
        // Checksum field stays zero while the sum is computed.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        Ok(buf)
    }

    /// Parse and validate a segment from `buf` (header + payload, no
    /// framing markers).
    ///
    /// The checksum is verified before the type tag is interpreted, so any
    /// bit damage is reported as [`CodecError::ChecksumFailed`].
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::BufferTooShort(buf.len()));
        }

        let length = read_u16(buf, OFF_LENGTH);
        let actual = buf.len() - HEADER_LEN;
        if length as usize != actual {
            return Err(CodecError::LengthMismatch {
                declared: length as usize,
                actual,
            });
        }
        if actual > MAX_SEG_LEN {
            return Err(CodecError::PayloadTooLong {
                len: actual,
                max: MAX_SEG_LEN,
            });
        }
        if !verify(buf) {
            return Err(CodecError::ChecksumFailed);
        }

        Ok(Self {
            header: Header {
                src_port: read_u32(buf, OFF_SRC_PORT),
                dest_port: read_u32(buf, OFF_DEST_PORT),
                seq_num: read_u32(buf, OFF_SEQ),
                ack_num: read_u32(buf, OFF_ACK),
                length,
                seg_type: SegmentType::from_u16(read_u16(buf, OFF_TYPE))?,
                rcv_win: read_u16(buf, OFF_RCV_WIN),
                checksum: read_u16(buf, OFF_CHECKSUM),
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Raw type tag and sequence number of an undecoded segment, if the buffer
/// is long enough to hold a header. Used by the fault simulator to match
/// scripted rules without trusting the checksum.
pub(crate) fn peek_type_and_seq(buf: &[u8]) -> Option<(u16, u32)> {
    (buf.len() >= HEADER_LEN).then(|| (read_u16(buf, OFF_TYPE), read_u32(buf, OFF_SEQ)))
}

/// Payload length announced by a raw header.
pub(crate) fn peek_length(header: &[u8]) -> usize {
    read_u16(header, OFF_LENGTH) as usize
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Sum consecutive big-endian 16-bit words with end-around carry.
///
/// An odd trailing byte is padded with a zero byte on the right.
fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Checksum of `data`. The caller must zero the checksum field first.
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// `true` when the one's-complement sum over `data`, checksum field
/// included, folds to all ones (its complement is zero).
pub fn verify(data: &[u8]) -> bool {
    !ones_complement_sum(data) == 0
}
