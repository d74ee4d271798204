//! `stcp-sip` — a reliable transport (STCP) running over a distance-vector
//! routed overlay (SIP).
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐                               ┌────────────┐
//!  │ StcpClient │                               │ StcpServer │
//!  └─────┬──────┘                               └─────▲──────┘
//!        │ framed segments ("!&" … "!#")              │
//!  ┌─────▼──────┐   SIP packets    ┌─────────┐  ┌─────┴──────┐
//!  │  SipNode   │─────────────────▶│ SipNode │─▶│  SipNode   │
//!  │ (DV, NCT,  │◀──route updates──│         │◀─│            │
//!  │  routing)  │                  └─────────┘  └────────────┘
//!  └────────────┘        overlay mesh (links, costs)
//! ```
//!
//! Transport side:
//! - [`segment`]   — segment header, checksum, wire format
//! - [`codec`]     — marker framing between transport and SIP
//! - [`link`]      — shared writer / single reader over one byte stream
//! - [`simulator`] — segment loss and bit-flip injection
//! - [`client`]    — client TCBs: handshake, Go-Back-N send, teardown
//! - [`server`]    — server TCBs: accept, in-order receive, CLOSE_WAIT
//! - [`sender`]    — Go-Back-N send queue
//! - [`receiver`]  — cumulative-ACK receive buffer
//! - [`state`]     — client and server state machines
//! - [`pool`]      — fixed-capacity TCB table
//! - [`timer`]     — retry budgets and cancellable tasks
//!
//! Routing side:
//! - [`topology`]        — overlay links and costs
//! - [`neighbors`]       — neighbour cost table with liveness
//! - [`distance_vector`] — this node's advertised costs
//! - [`routing_table`]   — destination → next hop
//! - [`packet`]          — SIP packet and route-update wire format
//! - [`overlay`]         — in-process node-to-node links
//! - [`sip`]             — the routing node and its tasks
//! - [`cost`]            — saturating cost arithmetic

pub mod client;
pub mod codec;
pub mod config;
pub mod cost;
pub mod distance_vector;
pub mod error;
pub mod link;
pub mod neighbors;
pub mod overlay;
pub mod packet;
pub mod pool;
pub mod receiver;
pub mod routing_table;
pub mod segment;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod sip;
pub mod state;
pub mod timer;
pub mod topology;

/// Overlay node identifier.
pub type NodeId = u32;

/// Transport port number.
pub type Port = u32;
