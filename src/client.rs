//! STCP client: connection setup, Go-Back-N data transfer, teardown.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ sock / connect / send / disconnect / close
//!      ▼
//!  StcpClient ──────────────────────────────┐
//!    ├── SocketTable<ClientTcb>             │ shared
//!    │     └── ClientTcb                    │
//!    │           ├── Mutex<TcbInner>        │
//!    │           │     ├── ClientState      │
//!    │           │     ├── SendQueue ◀──────┼── drainer task (per TCB)
//!    │           │     └── TaskSlot         │
//!    │           └── Notify (state changed) │
//!    ├── SegmentLink (writer) ──────────────┘──▶ SIP
//!    └── receiver task ◀── SegmentSource ◀──────  SIP
//! ```
//!
//! A single receiver task owns the read half of the link. It decodes each
//! segment, finds the TCB whose local port matches the destination port,
//! and drives that TCB's state machine under the TCB lock. API calls block
//! on the TCB's [`Notify`] instead of polling.
//!
//! `send` never blocks: data is chunked and queued, and a per-TCB drainer
//! task releases at most `gbn_window` segments at a time, retransmitting
//! the whole in-flight window whenever the oldest segment times out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::DecodeOutcome;
use crate::config::TransportConfig;
use crate::error::StcpError;
use crate::link::{self, SegmentLink, SegmentSource, Stream};
use crate::pool::SocketTable;
use crate::segment::{Segment, SegmentType, MAX_SEG_LEN};
use crate::sender::SendQueue;
use crate::simulator::Simulator;
use crate::state::ClientState;
use crate::timer::{RetryPolicy, TaskSlot};
use crate::{NodeId, Port};

// ---------------------------------------------------------------------------
// ClientTcb
// ---------------------------------------------------------------------------

/// Transport control block for one client connection.
pub struct ClientTcb {
    client_port: Port,
    inner: Mutex<TcbInner>,
    changed: Notify,
}

struct TcbInner {
    state: ClientState,
    server_node: NodeId,
    server_port: Port,
    queue: SendQueue,
    /// Set while a drainer task owns the queue.
    draining: bool,
    drainer: TaskSlot,
    /// The link to SIP is gone; every wait must return.
    peer_gone: bool,
}

impl ClientTcb {
    fn new(client_port: Port, window: usize) -> Self {
        Self {
            client_port,
            inner: Mutex::new(TcbInner {
                state: ClientState::Closed,
                server_node: 0,
                server_port: 0,
                queue: SendQueue::new(window),
                draining: false,
                drainer: TaskSlot::default(),
                peer_gone: false,
            }),
            changed: Notify::new(),
        }
    }

    /// Block until `pred` holds. The notification is armed before the
    /// predicate is checked, so a wake-up between the two is not lost.
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

    /// Give up on an exchange still waiting in `waiting`: force CLOSED and
    /// stop the drainer. Returns `false`, leaving the state alone, if the
    /// reply landed after the last timeout.
    fn expire(&self, waiting: ClientState) -> bool {
        let mut g = self.inner.lock();
        if g.state != waiting {
            return false;
        }
        g.state = ClientState::Closed;
        g.drainer.cancel();
        g.draining = false;
        drop(g);
        self.changed.notify_waiters();
        true
    }

    fn invalid_state(&self, op: &'static str, state: ClientState) -> StcpError {
        log::debug!("[stcp:client] port={} `{op}` refused in {state}", self.client_port);
        StcpError::InvalidState {
            op,
            state: state.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// StcpClient
// ---------------------------------------------------------------------------

struct Shared {
    config: TransportConfig,
    link: SegmentLink,
    table: SocketTable<ClientTcb>,
    closed: AtomicBool,
}

/// Client-side transport endpoint bound to one SIP link.
pub struct StcpClient {
    shared: Arc<Shared>,
    receiver: TaskSlot,
}

impl StcpClient {
    /// Attach to SIP over `stream` and start the segment receiver.
    ///
    /// `max_seg_len` is clamped to `1..=MAX_SEG_LEN`.
    pub fn start(stream: impl Stream, mut config: TransportConfig, sim: Simulator) -> Self {
        config.max_seg_len = config.max_seg_len.clamp(1, MAX_SEG_LEN);
        let (link, source) = link::split(stream, sim);
        let shared = Arc::new(Shared {
            table: SocketTable::new(config.max_connections),
            config,
            link,
            closed: AtomicBool::new(false),
        });
        let mut receiver = TaskSlot::default();
        receiver.replace(tokio::spawn(receive_loop(Arc::clone(&shared), source)));
        log::info!("[stcp:client] started");
        Self { shared, receiver }
    }

    /// Allocate a CLOSED TCB bound to `client_port` and return its handle.
    pub fn sock(&self, client_port: Port) -> Result<usize, StcpError> {
        let tcb = Arc::new(ClientTcb::new(client_port, self.shared.config.gbn_window));
        let id = self.shared.table.insert(Arc::clone(&tcb))?;
        if self.shared.closed.load(Ordering::SeqCst) {
            tcb.inner.lock().peer_gone = true;
        }
        log::debug!("[stcp:client] sock {id} bound to port {client_port}");
        Ok(id)
    }

    pub fn state(&self, sock: usize) -> Result<ClientState, StcpError> {
        Ok(self.shared.table.get(sock)?.inner.lock().state)
    }

    /// Number of segments queued on `sock` and not yet acknowledged.
    pub fn pending(&self, sock: usize) -> Result<usize, StcpError> {
        Ok(self.shared.table.get(sock)?.inner.lock().queue.len())
    }

    /// Open a connection to `server_port` on `server_node`.
    ///
    /// Sends SYN up to `syn_max_retry` times, waiting `syn_timeout` for the
    /// SYNACK after each. On failure the TCB is back in CLOSED and may be
    /// connected again.
    pub async fn connect(
        &self,
        sock: usize,
        server_node: NodeId,
        server_port: Port,
    ) -> Result<(), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        {
            let mut g = tcb.inner.lock();
            if g.state != ClientState::Closed {
                return Err(tcb.invalid_state("connect", g.state));
            }
            if g.peer_gone {
                return Err(StcpError::ChannelClosed);
            }
            g.state = ClientState::SynSent;
            g.server_node = server_node;
            g.server_port = server_port;
        }

        let cfg = &self.shared.config;
        let policy = RetryPolicy::new(cfg.syn_timeout, cfg.syn_max_retry);
        let syn = Segment::control(SegmentType::Syn, tcb.client_port, server_port);

        for attempt in policy.attempts() {
            log::debug!(
                "[stcp:client] → SYN port={} node={server_node} attempt {attempt}/{}",
                tcb.client_port,
                policy.max_attempts
            );
            if let Err(e) = self.shared.link.send(server_node, &syn).await {
                tcb.inner.lock().state = ClientState::Closed;
                return Err(e);
            }

            let reply = policy
                .wait(tcb.wait_until(|t| t.state != ClientState::SynSent || t.peer_gone))
                .await;
            if reply.is_some() {
                let mut g = tcb.inner.lock();
                if g.state == ClientState::Connected {
                    log::info!("[stcp:client] port={} connected", tcb.client_port);
                    return Ok(());
                }
                g.state = ClientState::Closed;
                return Err(StcpError::ChannelClosed);
            }
        }

        if !tcb.expire(ClientState::SynSent) {
            log::info!("[stcp:client] port={} connected", tcb.client_port);
            return Ok(());
        }
        log::warn!(
            "[stcp:client] port={} no SYNACK after {} attempts",
            tcb.client_port,
            policy.max_attempts
        );
        Err(StcpError::ConnectFailed(policy.max_attempts))
    }

    /// Queue `data` for delivery and return immediately.
    pub fn send(&self, sock: usize, data: &[u8]) -> Result<(), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        {
            let mut g = tcb.inner.lock();
            if g.state != ClientState::Connected {
                return Err(tcb.invalid_state("send", g.state));
            }
            if g.peer_gone {
                return Err(StcpError::ChannelClosed);
            }

            let inner = &mut *g;
            for chunk in data.chunks(self.shared.config.max_seg_len) {
                inner
                    .queue
                    .enqueue(tcb.client_port, inner.server_port, chunk.to_vec());
            }
            log::debug!(
                "[stcp:client] port={} queued {} bytes ({} segments pending)",
                tcb.client_port,
                data.len(),
                inner.queue.len()
            );

            if !inner.draining && !inner.queue.is_empty() {
                inner.draining = true;
                inner
                    .drainer
                    .replace(tokio::spawn(drain(Arc::clone(&self.shared), Arc::clone(&tcb))));
            }
        }
        tcb.changed.notify_waiters();
        Ok(())
    }

    /// Close the connection gracefully.
    ///
    /// Waits for every queued segment to be acknowledged, then sends FIN up
    /// to `fin_max_retry` times. The TCB ends in CLOSED either way; running
    /// out of attempts is reported as [`StcpError::DisconnectFailed`].
    pub async fn disconnect(&self, sock: usize) -> Result<(), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        {
            let g = tcb.inner.lock();
            if g.state != ClientState::Connected {
                return Err(tcb.invalid_state("disconnect", g.state));
            }
        }

        tcb.wait_until(|t| t.queue.is_empty() || t.peer_gone).await;

        let (server_node, server_port) = {
            let mut g = tcb.inner.lock();
            if g.peer_gone {
                g.state = ClientState::Closed;
                g.queue.clear();
                g.drainer.cancel();
                return Err(StcpError::ChannelClosed);
            }
            g.state = ClientState::FinWait;
            (g.server_node, g.server_port)
        };

        let cfg = &self.shared.config;
        let policy = RetryPolicy::new(cfg.fin_timeout, cfg.fin_max_retry);
        let fin = Segment::control(SegmentType::Fin, tcb.client_port, server_port);

        for attempt in policy.attempts() {
            log::debug!(
                "[stcp:client] → FIN port={} attempt {attempt}/{}",
                tcb.client_port,
                policy.max_attempts
            );
            if let Err(e) = self.shared.link.send(server_node, &fin).await {
                tcb.inner.lock().state = ClientState::Closed;
                return Err(e);
            }

            let reply = policy
                .wait(tcb.wait_until(|t| t.state == ClientState::Closed || t.peer_gone))
                .await;
            if reply.is_some() {
                let mut g = tcb.inner.lock();
                if g.state == ClientState::Closed {
                    log::info!("[stcp:client] port={} disconnected", tcb.client_port);
                    return Ok(());
                }
                g.state = ClientState::Closed;
                return Err(StcpError::ChannelClosed);
            }
        }

        if !tcb.expire(ClientState::FinWait) {
            log::info!("[stcp:client] port={} disconnected", tcb.client_port);
            return Ok(());
        }
        log::warn!(
            "[stcp:client] port={} no FINACK after {} attempts; forcing CLOSED",
            tcb.client_port,
            policy.max_attempts
        );
        Err(StcpError::DisconnectFailed(policy.max_attempts))
    }

    /// Free a CLOSED TCB. Its handle becomes available to `sock`.
    pub fn close(&self, sock: usize) -> Result<(), StcpError> {
        let tcb = self.shared.table.get(sock)?;
        let mut g = tcb.inner.lock();
        if g.state != ClientState::Closed {
            return Err(tcb.invalid_state("close", g.state));
        }
        g.drainer.cancel();
        g.queue.clear();
        drop(g);
        self.shared.table.remove_if(sock, &tcb);
        log::debug!("[stcp:client] sock {sock} freed");
        Ok(())
    }
}

impl Drop for StcpClient {
    fn drop(&mut self) {
        self.receiver.cancel();
        for tcb in self.shared.table.live() {
            tcb.inner.lock().drainer.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Push queued segments to the network until the queue is empty.
async fn drain(shared: Arc<Shared>, tcb: Arc<ClientTcb>) {
    let cfg = &shared.config;
    loop {
        let notified = tcb.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let (node, batch) = {
            let mut g = tcb.inner.lock();
            if g.queue.is_empty() || g.peer_gone {
                g.draining = false;
                return;
            }
            let now = Instant::now();
            let mut batch = Vec::new();
            if g.queue.timed_out(now, cfg.data_timeout) {
                batch = g.queue.retransmit(now);
                log::debug!(
                    "[stcp:client] port={} timeout; going back {} segment(s)",
                    tcb.client_port,
                    batch.len()
                );
            }
            batch.extend(g.queue.release_unsent(now));
            (g.server_node, batch)
        };

        for seg in &batch {
            log::trace!(
                "[stcp:client] → DATA seq={} len={}",
                seg.header.seq_num,
                seg.payload.len()
            );
            match shared.link.send(node, seg).await {
                Ok(()) => {}
                Err(e @ (StcpError::ChannelClosed | StcpError::Io(_))) => {
                    log::warn!("[stcp:client] port={} send failed: {e}", tcb.client_port);
                    let mut g = tcb.inner.lock();
                    g.peer_gone = true;
                    g.draining = false;
                    drop(g);
                    tcb.changed.notify_waiters();
                    return;
                }
                Err(e) => log::warn!(
                    "[stcp:client] port={} segment seq={} not sent: {e}",
                    tcb.client_port,
                    seg.header.seq_num
                ),
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.sendbuf_poll_interval) => {}
            _ = &mut notified => {}
        }
    }
}

async fn receive_loop(shared: Arc<Shared>, mut source: SegmentSource) {
    loop {
        match source.next().await {
            Ok(DecodeOutcome::Delivered { node, segment }) => dispatch(&shared, node, segment),
            Ok(DecodeOutcome::Dropped) => log::debug!("[stcp:client] segment lost"),
            Ok(DecodeOutcome::Corrupted) => log::debug!("[stcp:client] segment corrupted"),
            Ok(DecodeOutcome::ChannelClosed) => break,
            Err(e) => {
                log::warn!("[stcp:client] link read failed: {e}");
                break;
            }
        }
    }

    log::info!("[stcp:client] link to SIP closed; releasing all waiters");
    shared.closed.store(true, Ordering::SeqCst);
    for tcb in shared.table.live() {
        tcb.inner.lock().peer_gone = true;
        tcb.changed.notify_waiters();
    }
}

/// Drive one TCB's state machine with an incoming segment.
fn dispatch(shared: &Shared, node: NodeId, seg: Segment) {
    let port = seg.header.dest_port;
    let Some(tcb) = shared.table.find(|t| t.client_port == port) else {
        log::debug!("[stcp:client] {} for unknown port {port}", seg.seg_type());
        return;
    };

    let mut g = tcb.inner.lock();
    match (g.state, seg.seg_type()) {
        (ClientState::SynSent, SegmentType::SynAck) => {
            log::debug!("[stcp:client] ← SYNACK port={port} from node {node}");
            g.state = ClientState::Connected;
        }
        (ClientState::Connected, SegmentType::SynAck) => {
            log::debug!("[stcp:client] ← duplicate SYNACK port={port}; ignored");
            return;
        }
        (ClientState::Connected | ClientState::FinWait, SegmentType::DataAck) => {
            let released = g.queue.on_ack(seg.header.seq_num);
            log::trace!(
                "[stcp:client] ← DATAACK ack={} released={released} pending={}",
                seg.header.seq_num,
                g.queue.len()
            );
            if released == 0 {
                return;
            }
        }
        (ClientState::FinWait, SegmentType::FinAck) => {
            log::debug!("[stcp:client] ← FINACK port={port}");
            g.state = ClientState::Closed;
            g.queue.clear();
        }
        (state, ty) => {
            log::debug!("[stcp:client] ← {ty} port={port} ignored in {state}");
            return;
        }
    }
    drop(g);
    tcb.changed.notify_waiters();
}
