//! SIP: the distance-vector routing node.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────── SipNode ───────────────────┐
//!                 │  Mutex<Tables>                                 │
//!                 │    ├── NeighborCostTable (direct costs, alive) │
//!                 │    ├── DistanceVector    (advertised costs)    │
//!                 │    └── RoutingTable      (dest → next hop)     │
//!                 └────────────────────────────────────────────────┘
//!   overlay rx ──▶ packet handler ──┬─ ROUTE_UPDATE → apply_route_update
//!                                   ├─ SIP for me   → transport link
//!                                   └─ SIP for other → overlay (next hop)
//!   transport  ──▶ bridge ──────────┬─ for me   → back to transport
//!                                   └─ for other → overlay (next hop)
//!   route-update daemon ── every interval ──▶ broadcast distance vector
//!   alive check ─────────── every threshold ─▶ declare silent neighbours dead
//! ```
//!
//! The three tables sit behind one lock, so a distance-vector change and the
//! routing change that goes with it are always seen together.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader, WriteHalf};

use crate::codec::{self, FrameOutcome};
use crate::config::RoutingConfig;
use crate::cost::{self, INFINITE_COST};
use crate::distance_vector::{DistanceVector, DvEntry};
use crate::error::SipError;
use crate::link::{BoxedStream, Stream};
use crate::neighbors::NeighborCostTable;
use crate::overlay::{NextHop, OverlayReceiver, OverlaySender};
use crate::packet::{self, Packet, PacketType};
use crate::routing_table::RoutingTable;
use crate::timer::TaskSlot;
use crate::topology::Topology;
use crate::NodeId;

struct Tables {
    nct: NeighborCostTable,
    dv: DistanceVector,
    routes: RoutingTable,
}

/// Routing state of one overlay node.
pub struct SipNode {
    me: NodeId,
    config: RoutingConfig,
    tables: Mutex<Tables>,
}

impl SipNode {
    pub fn new(topo: &Topology, config: RoutingConfig) -> Self {
        let me = topo.my_node_id();
        let nct = NeighborCostTable::from_topology(topo);
        let dv = DistanceVector::new(me, &nct, config.max_node_num);
        let routes =
            RoutingTable::from_neighbors(&nct, config.routing_table_slots, config.max_node_num);
        Self {
            me,
            config,
            tables: Mutex::new(Tables { nct, dv, routes }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.me
    }

    // -----------------------------------------------------------------------
    // Routing decisions
    // -----------------------------------------------------------------------

    /// Fold a neighbour's advertised distance vector into ours.
    ///
    /// A strictly cheaper path through `from` is adopted. If `from` already
    /// is the next hop for a destination, its new cost is adopted even when
    /// worse, so cost increases propagate. Equal-cost alternatives never
    /// displace the installed next hop.
    ///
    /// Returns the number of destinations whose cost changed.
    pub fn apply_route_update(&self, from: NodeId, entries: &[DvEntry]) -> Result<usize, SipError> {
        let mut t = self.tables.lock();
        if !t.nct.contains(from) {
            return Err(SipError::UnknownNeighbor(from));
        }
        if t.nct.mark_alive(from) {
            log::info!("[sip] node {}: neighbour {from} is back", self.me);
        }
        let via = t.nct.cost(from);
        let Tables { dv, routes, .. } = &mut *t;

        let mut changed = 0;
        let mut first_err = None;
        for e in entries.iter().filter(|e| e.node != self.me) {
            let candidate = cost::add(via, e.cost);
            let current = dv.cost(e.node);
            let res = if candidate < current {
                log::debug!(
                    "[sip] node {}: to {} via {from} cost {current} → {candidate}",
                    self.me,
                    e.node
                );
                dv.set_cost(e.node, candidate)
                    .and_then(|()| routes.set_next_hop(e.node, from))
            } else if candidate != current && routes.next_hop(e.node) == Some(from) {
                log::debug!(
                    "[sip] node {}: next hop {from} now reports {} at {candidate}",
                    self.me,
                    e.node
                );
                dv.set_cost(e.node, candidate)
            } else {
                continue;
            };
            match res {
                Ok(()) => changed += 1,
                Err(err) => {
                    log::warn!("[sip] node {}: route to {} not stored: {err}", self.me, e.node);
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }

    /// End a liveness period. Silent neighbours get an infinite cost, as do
    /// their own distance-vector entries and every destination routed
    /// through them. Returns the dead set.
    ///
    /// A neighbour that stays silent is reported again each period. A
    /// detour to it learned through a live neighbour comes back with that
    /// neighbour's next route update.
    pub fn check_liveness(&self) -> Vec<NodeId> {
        let mut t = self.tables.lock();
        let dead = t.nct.sweep();
        if dead.is_empty() {
            return dead;
        }

        // A destination with no route entry counts as its own next hop.
        let Tables { dv, routes, .. } = &mut *t;
        for e in dv.entries_mut() {
            if e.node == self.me {
                continue;
            }
            let via = routes.next_hop(e.node).unwrap_or(e.node);
            if dead.contains(&e.node) || dead.contains(&via) {
                e.cost = INFINITE_COST;
            }
        }
        dead
    }

    /// Next hop toward `dest`, if it is currently reachable.
    pub fn next_hop(&self, dest: NodeId) -> Option<NodeId> {
        let t = self.tables.lock();
        if !cost::is_reachable(t.dv.cost(dest)) {
            return None;
        }
        t.routes.next_hop(dest)
    }

    /// Believed cost to `dest`.
    pub fn distance(&self, dest: NodeId) -> u32 {
        self.tables.lock().dv.cost(dest)
    }

    pub fn neighbor_cost(&self, node: NodeId) -> u32 {
        self.tables.lock().nct.cost(node)
    }

    /// This node's route-update packet.
    pub fn advertisement(&self) -> Packet {
        let t = self.tables.lock();
        let entries: Vec<DvEntry> = t.dv.entries().copied().collect();
        Packet::route_update(self.me, &entries, self.config.max_node_num)
    }

    /// All three tables, formatted for logs.
    pub fn dump_tables(&self) -> String {
        let t = self.tables.lock();
        let mut out = String::new();
        let _ = write!(out, "{}{}{}", t.nct, t.dv, t.routes);
        out
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Start the routing tasks on an overlay port, with no local transport.
    pub fn start(self: Arc<Self>, (tx, rx): (OverlaySender, OverlayReceiver)) -> SipHandle {
        let transport = TransportSlot::default();
        let tasks = vec![
            tokio::spawn(handle_packets(
                Arc::clone(&self),
                tx.clone(),
                rx,
                Arc::clone(&transport),
            )),
            tokio::spawn(route_update_daemon(Arc::clone(&self), tx.clone())),
            tokio::spawn(alive_check(Arc::clone(&self))),
        ];

        log::info!("[sip] node {} up", self.me);
        SipHandle {
            node: self,
            tx,
            transport,
            bridge: TaskSlot::default(),
            tasks: tasks.into_iter().map(TaskSlot::from).collect(),
        }
    }

    /// Start the routing tasks and bridge `transport`, a byte stream to the
    /// local STCP endpoint.
    pub fn start_with_transport(
        self: Arc<Self>,
        overlay: (OverlaySender, OverlayReceiver),
        transport: impl Stream,
    ) -> SipHandle {
        let mut handle = self.start(overlay);
        handle.attach_transport(transport);
        handle
    }
}

type StcpWriter = Arc<tokio::sync::Mutex<WriteHalf<BoxedStream>>>;

/// Writer of the currently attached transport, shared with the packet
/// handler. Empty while no transport is attached.
type TransportSlot = Arc<Mutex<Option<StcpWriter>>>;

/// Running routing node. Dropping it stops every task.
pub struct SipHandle {
    node: Arc<SipNode>,
    tx: OverlaySender,
    transport: TransportSlot,
    bridge: TaskSlot,
    tasks: Vec<TaskSlot>,
}

impl SipHandle {
    pub fn node(&self) -> &Arc<SipNode> {
        &self.node
    }

    /// Bridge a new local transport. Any transport still attached is cut
    /// off; one that already went away leaves nothing behind.
    pub fn attach_transport(&mut self, transport: impl Stream) {
        let boxed: BoxedStream = Box::new(transport);
        let (rd, wr) = tokio::io::split(boxed);
        let wr: StcpWriter = Arc::new(tokio::sync::Mutex::new(wr));
        *self.transport.lock() = Some(Arc::clone(&wr));
        self.bridge.replace(tokio::spawn(stcp_bridge(
            Arc::clone(&self.node),
            self.tx.clone(),
            rd,
            wr,
            Arc::clone(&self.transport),
        )));
        log::info!("[sip] node {}: transport attached", self.node.me);
    }

    /// Whether a transport is attached and still connected.
    pub fn has_transport(&self) -> bool {
        self.transport.lock().is_some()
    }

    pub fn shutdown(mut self) {
        self.bridge.cancel();
        for t in &mut self.tasks {
            t.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn handle_packets(
    node: Arc<SipNode>,
    tx: OverlaySender,
    mut rx: OverlayReceiver,
    transport: TransportSlot,
) {
    while let Some(bytes) = rx.recv().await {
        let pkt = match Packet::decode(&bytes) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[sip] node {}: bad packet: {e}", node.me);
                continue;
            }
        };

        match pkt.pkt_type() {
            PacketType::RouteUpdate => {
                let from = pkt.header.src_node;
                let res = packet::decode_route_update(&pkt.payload)
                    .map_err(SipError::from)
                    .and_then(|entries| node.apply_route_update(from, &entries));
                if let Err(e) = res {
                    log::debug!("[sip] node {}: route update from {from}: {e}", node.me);
                }
            }
            PacketType::Sip if pkt.header.dest_node == node.me => {
                let writer = transport.lock().clone();
                match writer {
                    Some(w) => {
                        let mut w = w.lock().await;
                        let src = pkt.header.src_node;
                        if let Err(e) = codec::write_frame(&mut *w, src, &pkt.payload).await {
                            log::warn!("[sip] node {}: transport write failed: {e}", node.me);
                        }
                    }
                    None => log::debug!("[sip] node {}: no transport attached; dropped", node.me),
                }
            }
            PacketType::Sip => forward(&node, &tx, pkt.header.dest_node, bytes),
        }
    }

    log::info!("[sip] node {}: overlay closed", node.me);
    let writer = transport.lock().take();
    if let Some(w) = writer {
        let _ = w.lock().await.shutdown().await;
    }
}

fn forward(node: &SipNode, tx: &OverlaySender, dest: NodeId, bytes: Vec<u8>) {
    match node.next_hop(dest) {
        Some(hop) => {
            log::trace!("[sip] node {}: to {dest} via {hop}", node.me);
            if let Err(e) = tx.send(NextHop::Node(hop), bytes) {
                log::warn!("[sip] node {}: forward to {hop} failed: {e}", node.me);
            }
        }
        None => log::debug!("[sip] node {}: no route to {dest}; dropped", node.me),
    }
}

async fn route_update_daemon(node: Arc<SipNode>, tx: OverlaySender) {
    let mut ticker = tokio::time::interval(node.config.route_update_interval);
    loop {
        ticker.tick().await;
        match node.advertisement().encode() {
            Ok(bytes) => {
                log::trace!("[sip] node {}: broadcasting route update", node.me);
                if let Err(e) = tx.send(NextHop::Broadcast, bytes) {
                    log::warn!("[sip] node {}: route update not sent: {e}", node.me);
                }
            }
            Err(e) => log::warn!("[sip] node {}: route update not encoded: {e}", node.me),
        }
    }
}

async fn alive_check(node: Arc<SipNode>) {
    loop {
        tokio::time::sleep(node.config.alive_threshold).await;
        let dead = node.check_liveness();
        if !dead.is_empty() {
            log::debug!("[sip] node {}: dead neighbours {dead:?}", node.me);
        }
    }
}

/// Carry segments from the local transport into the overlay.
async fn stcp_bridge(
    node: Arc<SipNode>,
    tx: OverlaySender,
    rd: tokio::io::ReadHalf<BoxedStream>,
    wr: StcpWriter,
    current: TransportSlot,
) {
    let mut rd = BufReader::new(rd);
    loop {
        let frame = match codec::read_frame(&mut rd).await {
            Ok(FrameOutcome::Frame(f)) => f,
            Ok(FrameOutcome::Corrupted) => {
                log::debug!("[sip] node {}: damaged frame from transport", node.me);
                continue;
            }
            Ok(FrameOutcome::ChannelClosed) => break,
            Err(e) => {
                log::warn!("[sip] node {}: transport read failed: {e}", node.me);
                break;
            }
        };

        let dest = frame.node;
        if dest == node.me {
            let mut w = wr.lock().await;
            if let Err(e) = codec::write_frame(&mut *w, node.me, &frame.bytes).await {
                log::warn!("[sip] node {}: loopback failed: {e}", node.me);
            }
            continue;
        }
        if node.next_hop(dest).is_none() {
            log::warn!("[sip] node {}: no route to {dest}; segment refused", node.me);
            continue;
        }
        match Packet::sip(node.me, dest, frame.bytes).encode() {
            Ok(bytes) => forward(&node, &tx, dest, bytes),
            Err(e) => log::warn!("[sip] node {}: segment not wrapped: {e}", node.me),
        }
    }
    {
        let mut slot = current.lock();
        if slot.as_ref().is_some_and(|w| Arc::ptr_eq(w, &wr)) {
            *slot = None;
        }
    }
    log::info!("[sip] node {}: transport detached", node.me);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RoutingConfig {
        RoutingConfig::default()
    }

    fn triangle(me: NodeId) -> SipNode {
        SipNode::new(&Topology::from_edges(me, &[(1, 2, 1), (2, 3, 1), (1, 3, 5)]), cfg())
    }

    #[test]
    fn initial_routes_are_direct() {
        let a = triangle(1);
        assert_eq!(a.next_hop(3), Some(3));
        assert_eq!(a.distance(3), 5);
        assert_eq!(a.distance(1), 0);
        assert_eq!(a.next_hop(1), None);
    }

    #[test]
    fn cheaper_path_through_neighbour_is_adopted() {
        let a = triangle(1);
        let b_dv = [
            DvEntry { node: 2, cost: 0 },
            DvEntry { node: 3, cost: 1 },
            DvEntry { node: 1, cost: 1 },
        ];
        assert_eq!(a.apply_route_update(2, &b_dv).unwrap(), 1);
        assert_eq!(a.next_hop(3), Some(2));
        assert_eq!(a.distance(3), 2);
    }

    #[test]
    fn next_hop_cost_increase_is_adopted_even_if_worse() {
        let a = triangle(1);
        a.apply_route_update(2, &[DvEntry { node: 3, cost: 1 }]).unwrap();
        a.apply_route_update(2, &[DvEntry { node: 3, cost: INFINITE_COST }]).unwrap();
        assert_eq!(a.distance(3), INFINITE_COST);
        assert_eq!(a.next_hop(3), None);

        // the direct link advertises itself and wins again
        a.apply_route_update(3, &[DvEntry { node: 3, cost: 0 }]).unwrap();
        assert_eq!(a.next_hop(3), Some(3));
        assert_eq!(a.distance(3), 5);
    }

    #[test]
    fn silent_neighbour_invalidates_routes_through_it() {
        let a = triangle(1);
        a.apply_route_update(2, &[DvEntry { node: 3, cost: 1 }]).unwrap();

        // 3 was silent this period; its entry dies even though 2 carries it
        assert_eq!(a.check_liveness(), vec![3]);
        assert_eq!(a.neighbor_cost(3), INFINITE_COST);
        assert_eq!(a.distance(3), INFINITE_COST);
        assert_eq!(a.next_hop(3), None);
        assert_eq!(a.distance(2), 1);

        // the detour through 2 returns with 2's next update
        a.apply_route_update(2, &[DvEntry { node: 3, cost: 1 }]).unwrap();
        assert_eq!(a.next_hop(3), Some(2));
        assert_eq!(a.distance(3), 2);

        // 2 spoke this period, 3 did not
        assert_eq!(a.check_liveness(), vec![3]);
        assert_eq!(a.distance(3), INFINITE_COST);

        assert_eq!(a.check_liveness(), vec![2, 3]);
        assert_eq!(a.neighbor_cost(2), INFINITE_COST);
        assert_eq!(a.distance(2), INFINITE_COST);
        assert_eq!(a.distance(3), INFINITE_COST);

        // hearing from 2 again restores the direct link
        a.apply_route_update(2, &[DvEntry { node: 2, cost: 0 }]).unwrap();
        assert_eq!(a.neighbor_cost(2), 1);
        assert_eq!(a.next_hop(2), Some(2));
        assert_eq!(a.distance(2), 1);
    }

    #[test]
    fn update_from_stranger_is_rejected() {
        let a = triangle(1);
        assert!(matches!(
            a.apply_route_update(9, &[]),
            Err(SipError::UnknownNeighbor(9))
        ));
    }

    #[test]
    fn advertisement_carries_whole_vector() {
        let a = triangle(1);
        let pkt = a.advertisement();
        assert_eq!(pkt.header.dest_node, packet::BROADCAST_NODEID);
        let entries = packet::decode_route_update(&pkt.payload).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.contains(&DvEntry { node: 1, cost: 0 }));
    }

    #[test]
    fn tables_render_for_logs() {
        let dump = triangle(1).dump_tables();
        assert!(dump.contains("distance vector of node 1"));
        assert!(dump.contains("next hop"));
    }
}
