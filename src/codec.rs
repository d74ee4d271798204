//! Framing of segments onto the byte stream between a transport endpoint
//! and its local SIP process.
//!
//! ```text
//! +------+-----------+----------------------------+------+
//! | "!&" | node (u32)| header (24) | payload (len)| "!#" |
//! +------+-----------+----------------------------+------+
//! ```
//!
//! `node` is the destination when the transport writes and the source when
//! SIP delivers. The reader scans for `'!'`, so garbage between frames is
//! skipped and the stream resynchronises after a damaged frame. Markers are
//! assumed never to appear inside header or payload bytes.
//!
//! Two layers live here:
//! - [`read_frame`] / [`write_frame`] move opaque segment bytes. SIP uses
//!   these and never looks inside a segment.
//! - [`receive_and_decode`] / [`encode_and_send`] add the fault simulator
//!   and checksum validation on top, for the transport engines.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::FaultSide;
use crate::error::StcpError;
use crate::segment::{self, Segment, HEADER_LEN, MAX_SEG_LEN};
use crate::simulator::{Fault, Simulator};
use crate::NodeId;

pub const MARK_BEGIN: [u8; 2] = *b"!&";
pub const MARK_END: [u8; 2] = *b"!#";

/// Raw segment bytes tagged with a node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub node: NodeId,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Frame(Frame),
    /// Framing was damaged; the reader has moved past the bad bytes.
    Corrupted,
    ChannelClosed,
}

/// Result of receiving one segment.
#[derive(Debug)]
pub enum DecodeOutcome {
    Delivered { node: NodeId, segment: Segment },
    /// The simulator discarded the segment.
    Dropped,
    /// Damaged framing or a failed checksum.
    Corrupted,
    ChannelClosed,
}

fn is_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

// ---------------------------------------------------------------------------
// Raw frames
// ---------------------------------------------------------------------------

/// Read the next frame from `r`.
///
/// Not cancel-safe: dropping the future mid-frame loses sync until the next
/// begin marker. Call it from a dedicated reader loop.
pub async fn read_frame<R>(r: &mut R) -> io::Result<FrameOutcome>
where
    R: AsyncRead + Unpin,
{
    match read_frame_inner(r).await {
        Ok(outcome) => Ok(outcome),
        Err(e) if is_closed(&e) => Ok(FrameOutcome::ChannelClosed),
        Err(e) => Err(e),
    }
}

async fn read_frame_inner<R>(r: &mut R) -> io::Result<FrameOutcome>
where
    R: AsyncRead + Unpin,
{
    // Skip to the next '!'. If the byte after it is not '&', the frame is
    // reported corrupt and the scan resumes after that byte.
    let mut skipped = 0usize;
    while r.read_u8().await? != MARK_BEGIN[0] {
        skipped += 1;
    }
    if skipped > 0 {
        log::debug!("[seg] skipped {skipped} byte(s) looking for frame start");
    }
    if r.read_u8().await? != MARK_BEGIN[1] {
        log::debug!("[seg] broken begin marker; discarding");
        return Ok(FrameOutcome::Corrupted);
    }

    let node = r.read_u32().await?;

    let mut bytes = vec![0u8; HEADER_LEN];
    r.read_exact(&mut bytes).await?;
    let len = segment::peek_length(&bytes);
    if len > MAX_SEG_LEN {
        log::debug!("[seg] frame declares {len} payload bytes; discarding");
        return Ok(FrameOutcome::Corrupted);
    }
    bytes.resize(HEADER_LEN + len, 0);
    r.read_exact(&mut bytes[HEADER_LEN..]).await?;

    let mut end = [0u8; 2];
    r.read_exact(&mut end).await?;
    if end != MARK_END {
        log::debug!("[seg] missing end marker; discarding frame");
        return Ok(FrameOutcome::Corrupted);
    }

    Ok(FrameOutcome::Frame(Frame { node, bytes }))
}

/// Write one frame with a single `write_all`, so concurrent writers that
/// share `w` behind a lock never interleave.
pub async fn write_frame<W>(w: &mut W, node: NodeId, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(bytes.len() + 8);
    buf.extend_from_slice(&MARK_BEGIN);
    buf.extend_from_slice(&node.to_be_bytes());
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(&MARK_END);
    w.write_all(&buf).await?;
    w.flush().await
}

// ---------------------------------------------------------------------------
// Segments with fault injection
// ---------------------------------------------------------------------------

/// Encode `seg`, pass it through sender-side faults, and frame it for `node`.
///
/// A simulated drop is reported as success: from the caller's point of view
/// the segment left, and the network lost it.
pub async fn encode_and_send<W>(
    w: &mut W,
    node: NodeId,
    seg: &Segment,
    sim: Option<&Simulator>,
) -> Result<(), StcpError>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = seg.encode()?;
    if let Some(sim) = sim.filter(|s| s.side() == FaultSide::Sender) {
        if sim.apply(&mut bytes) == Fault::Drop {
            return Ok(());
        }
    }
    write_frame(w, node, &bytes).await.map_err(|e| {
        if is_closed(&e) {
            StcpError::ChannelClosed
        } else {
            StcpError::Io(e)
        }
    })
}

/// Read one frame, pass it through receiver-side faults, and validate it.
pub async fn receive_and_decode<R>(r: &mut R, sim: Option<&Simulator>) -> io::Result<DecodeOutcome>
where
    R: AsyncRead + Unpin,
{
    let Frame { node, mut bytes } = match read_frame(r).await? {
        FrameOutcome::Frame(f) => f,
        FrameOutcome::Corrupted => return Ok(DecodeOutcome::Corrupted),
        FrameOutcome::ChannelClosed => return Ok(DecodeOutcome::ChannelClosed),
    };

    if let Some(sim) = sim.filter(|s| s.side() == FaultSide::Receiver) {
        if sim.apply(&mut bytes) == Fault::Drop {
            return Ok(DecodeOutcome::Dropped);
        }
    }

    match Segment::decode(&bytes) {
        Ok(segment) => Ok(DecodeOutcome::Delivered { node, segment }),
        Err(e) => {
            log::debug!("[seg] discarding segment from node {node}: {e}");
            Ok(DecodeOutcome::Corrupted)
        }
    }
}
