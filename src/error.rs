//! Error types for every layer of the stack.
//!
//! Usage errors (bad handle, wrong state) are reported synchronously and
//! never touch shared state. Transient network faults never show up here:
//! the transport absorbs them with retransmission. Only exhausted retry
//! budgets, a closed channel, or a capacity limit reach the caller.

use std::io;

use thiserror::Error;

use crate::NodeId;

/// Errors raised while parsing segments or overlay packets off the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header ({0} bytes)")]
    BufferTooShort(usize),

    /// `length` field disagrees with the number of payload bytes present.
    #[error("length field {declared} does not match {actual} payload bytes")]
    LengthMismatch { declared: usize, actual: usize },

    /// Payload larger than the protocol maximum.
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLong { len: usize, max: usize },

    /// Type tag outside the known set.
    #[error("unknown type tag {0}")]
    UnknownType(u16),

    /// One's-complement sum over the received bytes was not zero.
    #[error("checksum verification failed")]
    ChecksumFailed,
}

/// Errors surfaced by the STCP client and server APIs.
#[derive(Debug, Error)]
pub enum StcpError {
    /// The handle does not name a live TCB.
    #[error("invalid socket handle {0}")]
    InvalidSocket(usize),

    /// The TCB is in the wrong state for the requested operation.
    #[error("operation `{op}` not allowed in state {state}")]
    InvalidState { op: &'static str, state: String },

    /// Every TCB slot is taken.
    #[error("no free TCB slot (capacity {0})")]
    NoFreeSlot(usize),

    /// SYN retry budget exhausted without a SYNACK.
    #[error("connect failed after {0} SYN attempts")]
    ConnectFailed(u32),

    /// FIN retry budget exhausted without a FINACK. The TCB is CLOSED anyway.
    #[error("disconnect did not complete after {0} FIN attempts")]
    DisconnectFailed(u32),

    /// The channel to the routing layer is gone.
    #[error("channel to the network layer closed")]
    ChannelClosed,

    /// The peer finished the connection before the requested bytes arrived.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A `recv` asked for more bytes than the receive buffer can ever hold.
    #[error("requested {requested} bytes but the receive buffer holds at most {capacity}")]
    BufferCapacity { requested: usize, capacity: usize },

    /// A segment could not be encoded.
    #[error("segment encode error: {0}")]
    Codec(#[from] CodecError),

    /// Underlying I/O error on the channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the routing layer and its tables.
#[derive(Debug, Error)]
pub enum SipError {
    /// A fixed-capacity table has no room for another destination.
    #[error("{table} table full (capacity {capacity})")]
    TableFull { table: &'static str, capacity: usize },

    /// A route update arrived from a node that is not a direct neighbour.
    #[error("node {0} is not a neighbour")]
    UnknownNeighbor(NodeId),

    /// The overlay or transport channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Malformed packet.
    #[error("packet decode error: {0}")]
    Codec(#[from] CodecError),

    /// Underlying I/O error on a channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while loading a topology description.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read topology file: {0}")]
    Io(#[from] io::Error),

    /// A line did not have the `hostA hostB cost` shape.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// A host name could not be mapped to a node id.
    #[error("cannot derive a node id from `{0}`")]
    UnknownHost(String),
}
