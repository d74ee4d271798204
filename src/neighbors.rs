//! Direct-neighbour cost table with liveness tracking.
//!
//! Every neighbour starts at its topology link cost with the liveness flag
//! clear. Any route update from a neighbour sets its flag; once per
//! liveness period [`NeighborCostTable::sweep`] declares every neighbour
//! whose flag is still clear dead (cost becomes infinite) and clears all
//! flags for the next period. A dead neighbour that is heard from again gets
//! its link cost back.

use std::fmt;

use crate::cost::INFINITE_COST;
use crate::topology::Topology;
use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub node: NodeId,
    /// Current cost; infinite while the neighbour is presumed dead.
    pub cost: u32,
    /// Configured cost of the direct link.
    pub link_cost: u32,
    /// Heard from during the current liveness period.
    pub updated: bool,
}

#[derive(Debug, Clone)]
pub struct NeighborCostTable {
    entries: Vec<NeighborEntry>,
}

impl NeighborCostTable {
    pub fn from_topology(topo: &Topology) -> Self {
        let me = topo.my_node_id();
        let entries = topo
            .neighbor_ids()
            .into_iter()
            .map(|node| {
                let cost = topo.link_cost(me, node);
                NeighborEntry {
                    node,
                    cost,
                    link_cost: cost,
                    updated: false,
                }
            })
            .collect();
        Self { entries }
    }

    /// Current cost to `node`, or [`INFINITE_COST`] if it is not a neighbour.
    pub fn cost(&self, node: NodeId) -> u32 {
        self.get(node).map_or(INFINITE_COST, |e| e.cost)
    }

    pub fn get(&self, node: NodeId) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| e.node == node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.get(node).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|e| e.node)
    }

    pub fn entries(&self) -> &[NeighborEntry] {
        &self.entries
    }

    /// Record that `node` was heard from. Returns `true` if it had been
    /// presumed dead and has now been revived. Unknown nodes are ignored.
    pub fn mark_alive(&mut self, node: NodeId) -> bool {
        let Some(e) = self.entries.iter_mut().find(|e| e.node == node) else {
            return false;
        };
        e.updated = true;
        if e.cost >= INFINITE_COST && e.link_cost < INFINITE_COST {
            e.cost = e.link_cost;
            return true;
        }
        false
    }

    /// End the liveness period: neighbours not heard from get an infinite
    /// cost and are returned. All flags are cleared.
    pub fn sweep(&mut self) -> Vec<NodeId> {
        let mut dead = Vec::new();
        for e in &mut self.entries {
            if !e.updated {
                if e.cost < INFINITE_COST {
                    log::info!("[sip] neighbour {} silent; presumed dead", e.node);
                }
                e.cost = INFINITE_COST;
                dead.push(e.node);
            }
            e.updated = false;
        }
        dead
    }
}

impl fmt::Display for NeighborCostTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "neighbour  cost")?;
        for e in &self.entries {
            writeln!(f, "{:>9}  {:>4}", e.node, e.cost)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NeighborCostTable {
        NeighborCostTable::from_topology(&Topology::from_edges(
            1,
            &[(1, 2, 1), (1, 3, 5), (2, 3, 1)],
        ))
    }

    #[test]
    fn built_from_direct_links() {
        let t = table();
        assert_eq!(t.ids().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(t.cost(2), 1);
        assert_eq!(t.cost(3), 5);
        assert_eq!(t.cost(4), INFINITE_COST);
    }

    #[test]
    fn silent_neighbours_die_at_sweep() {
        let mut t = table();
        t.mark_alive(2);
        assert_eq!(t.sweep(), vec![3]);
        assert_eq!(t.cost(2), 1);
        assert_eq!(t.cost(3), INFINITE_COST);
        // flags were cleared, so a second silent period kills 2 as well
        assert_eq!(t.sweep(), vec![2, 3]);
    }

    #[test]
    fn revived_neighbour_gets_link_cost_back() {
        let mut t = table();
        t.sweep();
        assert!(t.mark_alive(3));
        assert_eq!(t.cost(3), 5);
        assert!(!t.mark_alive(3));
        assert!(!t.mark_alive(42));
    }
}
