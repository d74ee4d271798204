//! In-process overlay network connecting routing nodes.
//!
//! The [`Mesh`] stands in for the node-to-node links a real deployment
//! would run over TCP. Each attached node gets an [`OverlaySender`] and an
//! [`OverlayReceiver`]; a message is one encoded packet. Links follow the
//! topology and can be cut and restored to simulate failures. A cut link
//! loses traffic silently, like a dead wire.
//!
//! ```text
//!   node 1 ──┐            ┌──▶ node 2 rx
//!            ├── Mesh ────┤
//!   node 3 ──┘  (links,   └──▶ node 3 rx
//!                cut set)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::SipError;
use crate::topology::Topology;
use crate::NodeId;

/// Where a packet leaves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHop {
    Node(NodeId),
    /// Every neighbour over a live link.
    Broadcast,
}

fn edge(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    (a.min(b), a.max(b))
}

struct MeshInner {
    links: BTreeSet<(NodeId, NodeId)>,
    cut: BTreeSet<(NodeId, NodeId)>,
    ports: HashMap<NodeId, UnboundedSender<Vec<u8>>>,
}

impl MeshInner {
    fn neighbors(&self, me: NodeId) -> Vec<NodeId> {
        self.links
            .iter()
            .filter_map(|&(a, b)| match (a == me, b == me) {
                (true, false) => Some(b),
                (false, true) => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Deliver to `to` if the link is up and `to` is attached.
    fn deliver(&self, from: NodeId, to: NodeId, bytes: Vec<u8>) {
        if self.cut.contains(&edge(from, to)) {
            log::trace!("[sip] link {from}-{to} is cut; packet lost");
            return;
        }
        match self.ports.get(&to) {
            Some(tx) if tx.send(bytes).is_ok() => {}
            _ => log::trace!("[sip] node {to} not attached; packet lost"),
        }
    }
}

/// Shared handle to the simulated overlay.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<Mutex<MeshInner>>,
}

impl Mesh {
    pub fn new(topo: &Topology) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MeshInner {
                links: topo
                    .links()
                    .iter()
                    .filter(|l| l.a != l.b)
                    .map(|l| edge(l.a, l.b))
                    .collect(),
                cut: BTreeSet::new(),
                ports: HashMap::new(),
            })),
        }
    }

    /// Plug `node` into the mesh. Attaching again replaces the old port,
    /// whose receiver then sees the channel close.
    pub fn attach(&self, node: NodeId) -> (OverlaySender, OverlayReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().ports.insert(node, tx);
        (
            OverlaySender {
                me: node,
                inner: Arc::clone(&self.inner),
            },
            OverlayReceiver { rx },
        )
    }

    /// Unplug `node`; its receiver drains what is queued and then closes.
    pub fn detach(&self, node: NodeId) {
        self.inner.lock().ports.remove(&node);
    }

    pub fn cut(&self, a: NodeId, b: NodeId) {
        log::info!("[sip] overlay link {a}-{b} cut");
        self.inner.lock().cut.insert(edge(a, b));
    }

    pub fn restore(&self, a: NodeId, b: NodeId) {
        log::info!("[sip] overlay link {a}-{b} restored");
        self.inner.lock().cut.remove(&edge(a, b));
    }
}

/// Sending side of one node's overlay port.
#[derive(Clone)]
pub struct OverlaySender {
    me: NodeId,
    inner: Arc<Mutex<MeshInner>>,
}

impl OverlaySender {
    /// Send one encoded packet. Unicast is only allowed to a neighbour.
    pub fn send(&self, hop: NextHop, bytes: Vec<u8>) -> Result<(), SipError> {
        let inner = self.inner.lock();
        match hop {
            NextHop::Node(to) => {
                if !inner.links.contains(&edge(self.me, to)) || to == self.me {
                    return Err(SipError::UnknownNeighbor(to));
                }
                inner.deliver(self.me, to, bytes);
            }
            NextHop::Broadcast => {
                for to in inner.neighbors(self.me) {
                    inner.deliver(self.me, to, bytes.clone());
                }
            }
        }
        Ok(())
    }
}

/// Receiving side of one node's overlay port.
pub struct OverlayReceiver {
    rx: UnboundedReceiver<Vec<u8>>,
}

impl OverlayReceiver {
    /// Next packet, or `None` once the node has been detached.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
