//! Integration tests for distance-vector routing over the in-process mesh.
//!
//! Every node runs its full task set with short intervals; assertions poll
//! until the expected routes appear or a deadline passes.

use std::sync::Arc;
use std::time::Duration;

use stcp_sip::config::RoutingConfig;
use stcp_sip::cost::INFINITE_COST;
use stcp_sip::overlay::Mesh;
use stcp_sip::sip::{SipHandle, SipNode};
use stcp_sip::topology::Topology;
use stcp_sip::NodeId;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast() -> RoutingConfig {
    RoutingConfig {
        route_update_interval: Duration::from_millis(20),
        alive_threshold: Duration::from_millis(150),
        ..RoutingConfig::default()
    }
}

/// Start a routing node for every node of `edges`.
fn boot(edges: &[(NodeId, NodeId, u32)]) -> (Mesh, Vec<SipHandle>) {
    let topo = Topology::from_edges(0, edges);
    let mesh = Mesh::new(&topo);
    let nodes = topo
        .node_ids()
        .into_iter()
        .map(|id| Arc::new(SipNode::new(&topo.with_node(id), fast())).start(mesh.attach(id)))
        .collect();
    (mesh, nodes)
}

fn node(nodes: &[SipHandle], id: NodeId) -> &Arc<SipNode> {
    nodes
        .iter()
        .map(SipHandle::node)
        .find(|n| n.node_id() == id)
        .unwrap()
}

/// Poll `cond` until it holds; panic with `what` after two seconds.
async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// With A-B:1, B-C:1 and A-C:5, A reaches C through B at cost 2.
#[tokio::test]
async fn triangle_converges_to_cheapest_path() {
    let (_mesh, nodes) = boot(&[(1, 2, 1), (2, 3, 1), (1, 3, 5)]);
    let a = node(&nodes, 1);
    let c = node(&nodes, 3);

    eventually("A to route C via B", || a.next_hop(3) == Some(2)).await;
    assert_eq!(a.distance(3), 2);
    eventually("C to route A via B", || c.next_hop(1) == Some(2)).await;
    assert_eq!(c.distance(1), 2);
}

#[tokio::test]
async fn line_converges_end_to_end() {
    let (_mesh, nodes) = boot(&[(1, 2, 1), (2, 3, 2), (3, 4, 3)]);
    let first = node(&nodes, 1);
    let last = node(&nodes, 4);

    eventually("1 to learn 4", || first.distance(4) == 6).await;
    assert_eq!(first.next_hop(4), Some(2));
    eventually("4 to learn 1", || last.distance(1) == 6).await;
    assert_eq!(last.next_hop(1), Some(3));
}

/// Two equal-cost paths: whichever next hop is installed first stays.
#[tokio::test]
async fn equal_cost_paths_do_not_flap() {
    let (_mesh, nodes) = boot(&[(1, 2, 1), (1, 3, 1), (2, 4, 1), (3, 4, 1)]);
    let a = node(&nodes, 1);

    eventually("1 to learn 4", || a.distance(4) == 2).await;
    let hop = a.next_hop(4);
    assert!(matches!(hop, Some(2) | Some(3)));
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.next_hop(4), hop);
        assert_eq!(a.distance(4), 2);
    }
}

/// Cutting A-B makes B dead to A, invalidates routes through B, and the
/// network reroutes over the expensive direct link.
#[tokio::test]
async fn dead_neighbour_routes_are_replaced() {
    let (mesh, nodes) = boot(&[(1, 2, 1), (2, 3, 1), (1, 3, 5)]);
    let a = node(&nodes, 1);

    eventually("initial convergence", || a.next_hop(3) == Some(2)).await;

    mesh.cut(1, 2);
    eventually("A to route B via C", || a.next_hop(2) == Some(3)).await;
    assert_eq!(a.distance(2), 6);
    eventually("A to route C directly", || a.next_hop(3) == Some(3)).await;
    assert_eq!(a.distance(3), 5);

    mesh.restore(1, 2);
    eventually("A to use B again", || a.next_hop(2) == Some(2)).await;
    eventually("A to route C via B again", || a.next_hop(3) == Some(2)).await;
    assert_eq!(a.distance(3), 2);
}

/// A node whose only link is cut loses every route once its neighbour is
/// declared dead.
#[tokio::test]
async fn cut_off_node_invalidates_everything_behind_its_neighbour() {
    let (mesh, nodes) = boot(&[(1, 2, 1), (2, 3, 1)]);
    let a = node(&nodes, 1);

    eventually("A to learn C", || a.next_hop(3) == Some(2)).await;
    mesh.cut(1, 2);
    eventually("B to be declared dead", || a.neighbor_cost(2) == INFINITE_COST).await;
    assert_eq!(a.distance(2), INFINITE_COST);
    assert_eq!(a.distance(3), INFINITE_COST);
    assert_eq!(a.next_hop(3), None);
    assert_eq!(a.distance(1), 0);
}
