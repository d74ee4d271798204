//! Wire format of overlay (SIP) packets.
//!
//! A packet is what one routing node hands another over an overlay link.
//! It is either a route update (consumed by the routing engine) or a SIP
//! packet wrapping one encoded transport segment as opaque bytes.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Source Node                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Destination Node                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Length             |             Type              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A route-update payload is a fixed array of `(node i32, cost u32)` pairs;
//! unused pairs carry node `-1`.

use crate::distance_vector::DvEntry;
use crate::error::CodecError;
use crate::NodeId;

pub const HEADER_LEN: usize = 12;

/// Largest payload: a 1500-byte MTU minus this header.
pub const MAX_PKT_LEN: usize = 1488;

/// Destination of a route update sent to every neighbour.
pub const BROADCAST_NODEID: NodeId = 9999;

const OFF_SRC: usize = 0;
const OFF_DEST: usize = 4;
const OFF_LENGTH: usize = 8;
const OFF_TYPE: usize = 10;

const DV_ENTRY_LEN: usize = 8;
const EMPTY_NODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    RouteUpdate = 1,
    Sip = 2,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::RouteUpdate),
            2 => Ok(Self::Sip),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub src_node: NodeId,
    pub dest_node: NodeId,
    /// Computed on encode, validated on decode.
    pub length: u16,
    pub pkt_type: PacketType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    fn new(pkt_type: PacketType, src_node: NodeId, dest_node: NodeId, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                src_node,
                dest_node,
                length: payload.len() as u16,
                pkt_type,
            },
            payload,
        }
    }

    /// Wrap an encoded transport segment for delivery to `dest_node`.
    pub fn sip(src_node: NodeId, dest_node: NodeId, segment: Vec<u8>) -> Self {
        Self::new(PacketType::Sip, src_node, dest_node, segment)
    }

    /// Advertise `entries` to every neighbour, padding to `capacity` slots.
    pub fn route_update(src_node: NodeId, entries: &[DvEntry], capacity: usize) -> Self {
        Self::new(
            PacketType::RouteUpdate,
            src_node,
            BROADCAST_NODEID,
            encode_route_update(entries, capacity),
        )
    }

    pub fn pkt_type(&self) -> PacketType {
        self.header.pkt_type
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let len = self.payload.len();
        if len > MAX_PKT_LEN {
            return Err(CodecError::PayloadTooLong {
                len,
                max: MAX_PKT_LEN,
            });
        }
        let h = &self.header;
        let mut buf = Vec::with_capacity(HEADER_LEN + len);
        buf.extend_from_slice(&h.src_node.to_be_bytes());
        buf.extend_from_slice(&h.dest_node.to_be_bytes());
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        buf.extend_from_slice(&(h.pkt_type as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::BufferTooShort(buf.len()));
        }
        let length = u16::from_be_bytes([buf[OFF_LENGTH], buf[OFF_LENGTH + 1]]);
        let actual = buf.len() - HEADER_LEN;
        if length as usize != actual {
            return Err(CodecError::LengthMismatch {
                declared: length as usize,
                actual,
            });
        }
        if actual > MAX_PKT_LEN {
            return Err(CodecError::PayloadTooLong {
                len: actual,
                max: MAX_PKT_LEN,
            });
        }
        Ok(Self {
            header: PacketHeader {
                src_node: read_u32(buf, OFF_SRC),
                dest_node: read_u32(buf, OFF_DEST),
                length,
                pkt_type: PacketType::from_u16(u16::from_be_bytes([
                    buf[OFF_TYPE],
                    buf[OFF_TYPE + 1],
                ]))?,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

// ---------------------------------------------------------------------------
// Route-update payload
// ---------------------------------------------------------------------------

/// Serialise `entries` as `max(capacity, entries.len())` fixed-width pairs.
pub fn encode_route_update(entries: &[DvEntry], capacity: usize) -> Vec<u8> {
    let slots = capacity.max(entries.len());
    let mut buf = Vec::with_capacity(slots * DV_ENTRY_LEN);
    for e in entries {
        buf.extend_from_slice(&(e.node as i32).to_be_bytes());
        buf.extend_from_slice(&e.cost.to_be_bytes());
    }
    for _ in entries.len()..slots {
        buf.extend_from_slice(&EMPTY_NODE.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
    }
    buf
}

/// Parse a route-update payload, skipping empty (negative-id) slots.
pub fn decode_route_update(payload: &[u8]) -> Result<Vec<DvEntry>, CodecError> {
    if payload.len() % DV_ENTRY_LEN != 0 {
        return Err(CodecError::LengthMismatch {
            declared: payload.len() / DV_ENTRY_LEN * DV_ENTRY_LEN,
            actual: payload.len(),
        });
    }
    Ok(payload
        .chunks_exact(DV_ENTRY_LEN)
        .filter_map(|c| {
            let node = i32::from_be_bytes([c[0], c[1], c[2], c[3]]);
            let cost = u32::from_be_bytes([c[4], c[5], c[6], c[7]]);
            (node >= 0).then(|| DvEntry {
                node: node as NodeId,
                cost,
            })
        })
        .collect())
}
