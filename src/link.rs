//! The transport's connection to its local SIP process.
//!
//! Any duplex byte stream works: a `TcpStream` to a SIP daemon, or one end
//! of a `tokio::io::duplex` pipe in tests. The stream is split once; the
//! write half is shared by every TCB behind an async mutex, the read half
//! belongs to the single receiver task.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::codec::{self, DecodeOutcome};
use crate::error::StcpError;
use crate::segment::Segment;
use crate::simulator::Simulator;
use crate::NodeId;

/// A byte stream that can carry frames between tasks.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Shared sending side of the link.
pub struct SegmentLink {
    writer: Mutex<WriteHalf<BoxedStream>>,
    sim: Arc<Simulator>,
}

/// Receiving side of the link, owned by one reader task.
pub struct SegmentSource {
    reader: BufReader<ReadHalf<BoxedStream>>,
    sim: Arc<Simulator>,
}

/// Split `stream` into a shareable sender and a single-owner receiver that
/// apply the same fault model.
pub fn split(stream: impl Stream, sim: Simulator) -> (SegmentLink, SegmentSource) {
    let boxed: BoxedStream = Box::new(stream);
    let (rd, wr) = tokio::io::split(boxed);
    let sim = Arc::new(sim);
    (
        SegmentLink {
            writer: Mutex::new(wr),
            sim: Arc::clone(&sim),
        },
        SegmentSource {
            reader: BufReader::new(rd),
            sim,
        },
    )
}

impl SegmentLink {
    /// Send `seg` toward `node`.
    pub async fn send(&self, node: NodeId, seg: &Segment) -> Result<(), StcpError> {
        let mut w = self.writer.lock().await;
        codec::encode_and_send(&mut *w, node, seg, Some(&self.sim)).await
    }
}

impl SegmentSource {
    /// Receive the next segment, or the reason there is none.
    pub async fn next(&mut self) -> io::Result<DecodeOutcome> {
        codec::receive_and_decode(&mut self.reader, Some(&self.sim)).await
    }
}
