//! STCP server: passive open, in-order receive buffering, teardown.
//!
//! The server mirrors [`crate::client`]: a table of TCBs addressed by
//! handle, one receiver task owning the read half of the SIP link, and
//! [`Notify`]-driven waits for `accept`, `recv` and `close`.
//!
//! ```text
//!   SIP ──▶ receiver task ──▶ ServerTcb (port match)
//!                                │  SYN   → SYNACK, LISTENING → CONNECTED
//!                                │  DATA  → RecvBuffer, DATAACK(expected)
//!                                │  FIN   → FINACK, CONNECTED → CLOSE_WAIT
//!                                ▼
//!                           replies ──▶ SegmentLink ──▶ SIP
//! ```
//!
//! The reply to a segment is computed under the TCB lock and sent after the
//! lock is released.
//!
//! A closed TCB is not freed at once. `close` waits for CLOSE_WAIT and then
//! schedules a reaper that frees the slot after `closewait_timeout`, so a
//! FIN retransmitted by a client that missed our FINACK is still answered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::DecodeOutcome;
use crate::config::TransportConfig;
use crate::error::StcpError;
use crate::link::{self, SegmentLink, SegmentSource, Stream};
use crate::pool::SocketTable;
use crate::receiver::{DataVerdict, RecvBuffer};
use crate::segment::{Segment, SegmentType};
use crate::simulator::Simulator;
use crate::state::ServerState;
use crate::timer::TaskSlot;
use crate::{NodeId, Port};

// ---------------------------------------------------------------------------
// ServerTcb
// ---------------------------------------------------------------------------

pub struct ServerTcb {
    server_port: Port,
    inner: Mutex<TcbInner>,
    changed: Notify,
}

struct TcbInner {
    state: ServerState,
    client_node: NodeId,
    client_port: Port,
    recv: RecvBuffer,
    reaper: TaskSlot,
    peer_gone: bool,
}

impl ServerTcb {
    fn new(server_port: Port, recv_buf_size: usize) -> Self {
        Self {
            server_port,
            inner: Mutex::new(TcbInner {
                state: ServerState::Closed,
                client_node: 0,
                client_port: 0,
                recv: RecvBuffer::new(recv_buf_size),
                reaper: TaskSlot::default(),
                peer_gone: false,
            }),
            changed: Notify::new(),
        }
    }

    async fn wait_until(&self, mut pred: impl FnMut(&TcbInner) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let done = pred(&*self.inner.lock());
            if done {
                return;
            }
            notified.await;
        }
    }

    fn invalid_state(&self, op: &'static str, state: ServerState) -> StcpError {
        log::debug!("[stcp:server] port={} `{op}` refused in {state}", self.server_port);
        StcpError::InvalidState {
            op,
            state: state.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// StcpServer
// ---------------------------------------------------------------------------

struct Shared {
    config: TransportConfig,
    link: SegmentLink,
    table: SocketTable<ServerTcb>,
    closed: AtomicBool,
}

/// Server-side transport endpoint bound to one SIP link.
pub struct StcpServer {
    shared: Arc<Shared>,
    receiver: TaskSlot,
}

impl StcpServer {
    /// Attach to SIP over `stream` and start the segment receiver.
    pub fn start(stream: impl Stream, config: TransportConfig, sim: Simulator) -> Self {
        let (link, source) = link::split(stream, sim);
        let shared = Arc::new(Shared {
            table: SocketTable::new(config.max_connections),
            config,
            link,
            closed: AtomicBool::new(false),
        });
        let mut receiver = TaskSlot::default();
        receiver.replace(tokio::spawn(receive_loop(Arc::clone(&shared), source)));
        log::info!("[stcp:server] started");
        Self { shared, receiver }
    }

    /// Allocate a CLOSED TCB bound to `server_port` and return its handle.
    pub fn sock(&self, server_port: Port) -> Result<usize, StcpError> {
        let tcb = Arc::new(ServerTcb::new(server_port, self.shared.config.recv_buf_size));
        let id = self.shared.table.insert(Arc::clone(&tcb))?;
        if self.shared.closed.load(Ordering::SeqCst) {
            tcb.inner.lock().peer_gone = true;
        }
        log::debug!("[stcp:server] sock {id} bound to port {server_port}");
        Ok(id)
    }

    pub fn state(&self, sock: usize) -> Result<ServerState, StcpError> {
        Ok(self.shared.table.get(sock)?.inner.lock().state)
    }

    /// Node and port of the connected client.
    pub fn peer(&self, sock: usize) -> Result<(NodeId, Port), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        let g = tcb.inner.lock();
        Ok((g.client_node, g.client_port))
    }

    /// Listen on the TCB and block until a client's SYN arrives.
    pub async fn accept(&self, sock: usize) -> Result<(), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        {
            let mut g = tcb.inner.lock();
            if g.state != ServerState::Closed {
                return Err(tcb.invalid_state("accept", g.state));
            }
            if g.peer_gone {
                return Err(StcpError::ChannelClosed);
            }
            g.state = ServerState::Listening;
        }
        log::debug!("[stcp:server] port={} listening", tcb.server_port);

        tcb.wait_until(|t| t.state != ServerState::Listening || t.peer_gone)
            .await;

        let g = tcb.inner.lock();
        match g.state {
            ServerState::Connected | ServerState::CloseWait => {
                log::info!(
                    "[stcp:server] port={} accepted node {} port {}",
                    tcb.server_port,
                    g.client_node,
                    g.client_port
                );
                Ok(())
            }
            _ => Err(StcpError::ChannelClosed),
        }
    }

    /// Block until `len` bytes are buffered, then remove and return them.
    ///
    /// Returns [`StcpError::ConnectionClosed`] if the client finished the
    /// connection with fewer than `len` bytes outstanding.
    pub async fn recv(&self, sock: usize, len: usize) -> Result<Vec<u8>, StcpError> {
        let tcb = self.shared.table.get(sock)?;
        {
            let g = tcb.inner.lock();
            if !matches!(g.state, ServerState::Connected | ServerState::CloseWait) {
                return Err(tcb.invalid_state("recv", g.state));
            }
            let capacity = g.recv.capacity();
            if len > capacity {
                return Err(StcpError::BufferCapacity {
                    requested: len,
                    capacity,
                });
            }
        }

        tcb.wait_until(|t| t.recv.len() >= len || t.peer_gone || t.state != ServerState::Connected)
            .await;

        let mut g = tcb.inner.lock();
        if g.recv.len() >= len {
            Ok(g.recv.take(len))
        } else if g.peer_gone {
            Err(StcpError::ChannelClosed)
        } else {
            Err(StcpError::ConnectionClosed)
        }
    }

    /// Release the TCB once the client has finished.
    ///
    /// A CLOSED TCB is freed at once. Otherwise this waits for CLOSE_WAIT
    /// and schedules the slot to be freed after `closewait_timeout`.
    pub async fn close(&self, sock: usize) -> Result<(), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        if tcb.inner.lock().state == ServerState::Closed {
            self.shared.table.remove_if(sock, &tcb);
            log::debug!("[stcp:server] sock {sock} freed");
            return Ok(());
        }

        tcb.wait_until(|t| t.state == ServerState::CloseWait || t.peer_gone)
            .await;

        let grace = self.shared.config.closewait_timeout;
        let reaper = {
            let shared = Arc::clone(&self.shared);
            let tcb = Arc::clone(&tcb);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                tcb.inner.lock().state = ServerState::Closed;
                if shared.table.remove_if(sock, &tcb) {
                    log::debug!("[stcp:server] sock {sock} reaped after CLOSE_WAIT");
                }
                tcb.changed.notify_waiters();
            })
        };
        tcb.inner.lock().reaper.replace(reaper);
        Ok(())
    }
}

impl Drop for StcpServer {
    fn drop(&mut self) {
        self.receiver.cancel();
        for tcb in self.shared.table.live() {
            tcb.inner.lock().reaper.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver task
// ---------------------------------------------------------------------------

async fn receive_loop(shared: Arc<Shared>, mut source: SegmentSource) {
    loop {
        match source.next().await {
            Ok(DecodeOutcome::Delivered { node, segment }) => {
                if let Some((to, reply)) = dispatch(&shared, node, segment) {
                    if let Err(e) = shared.link.send(to, &reply).await {
                        log::warn!("[stcp:server] reply failed: {e}");
                    }
                }
            }
            Ok(DecodeOutcome::Dropped) => log::debug!("[stcp:server] segment lost"),
            Ok(DecodeOutcome::Corrupted) => log::debug!("[stcp:server] segment corrupted"),
            Ok(DecodeOutcome::ChannelClosed) => break,
            Err(e) => {
                log::warn!("[stcp:server] link read failed: {e}");
                break;
            }
        }
    }

    log::info!("[stcp:server] link to SIP closed; releasing all waiters");
    shared.closed.store(true, Ordering::SeqCst);
    for tcb in shared.table.live() {
        {
            let mut g = tcb.inner.lock();
            g.peer_gone = true;
            if g.state == ServerState::Connected {
                g.state = ServerState::CloseWait;
            }
        }
        tcb.changed.notify_waiters();
    }
}

/// Drive one TCB's state machine with a segment from `node`. Returns the
/// reply to send, if any.
fn dispatch(shared: &Shared, node: NodeId, seg: Segment) -> Option<(NodeId, Segment)> {
    let port = seg.header.dest_port;
    let Some(tcb) = shared.table.find(|t| t.server_port == port) else {
        log::debug!("[stcp:server] {} for unknown port {port}", seg.seg_type());
        return None;
    };

    let src = seg.header.src_port;
    let reply = |ty| Some((node, Segment::control(ty, port, src)));

    let mut g = tcb.inner.lock();
    let (out, wake) = match (g.state, seg.seg_type()) {
        (ServerState::Listening, SegmentType::Syn) => {
            log::debug!("[stcp:server] ← SYN port={port} from node {node} port {src}");
            g.client_node = node;
            g.client_port = src;
            g.recv.reset();
            g.state = ServerState::Connected;
            (reply(SegmentType::SynAck), true)
        }
        (ServerState::Connected, SegmentType::Syn) => {
            log::debug!("[stcp:server] ← duplicate SYN port={port}; → SYNACK");
            (reply(SegmentType::SynAck), false)
        }
        (ServerState::Connected, SegmentType::Data) => {
            let seq = seg.header.seq_num;
            let verdict = g.recv.on_segment(seq, &seg.payload);
            let expected = g.recv.ack_number();
            log::trace!(
                "[stcp:server] ← DATA seq={seq} len={} {verdict:?}; expected={expected}",
                seg.payload.len()
            );
            let ack = Some((node, Segment::data_ack(port, src, expected)));
            match verdict {
                DataVerdict::Accepted => (ack, true),
                DataVerdict::OutOfOrder => (ack, false),
                DataVerdict::Overflow => {
                    log::debug!("[stcp:server] port={port} receive buffer full; DATA dropped");
                    (None, false)
                }
            }
        }
        (ServerState::Connected, SegmentType::Fin) => {
            log::debug!("[stcp:server] ← FIN port={port}; → FINACK, CLOSE_WAIT");
            g.state = ServerState::CloseWait;
            (reply(SegmentType::FinAck), true)
        }
        (ServerState::CloseWait, SegmentType::Fin) => {
            log::debug!("[stcp:server] ← duplicate FIN port={port}; → FINACK");
            (reply(SegmentType::FinAck), false)
        }
        (state, ty) => {
            log::debug!("[stcp:server] ← {ty} port={port} ignored in {state}");
            (None, false)
        }
    };
    drop(g);

    if wake {
        tcb.changed.notify_waiters();
    }
    out
}
