//! This node's distance vector: believed lowest cost to every destination.
//!
//! Fixed capacity, one slot per destination. A destination with no slot is
//! unreachable. The vector is what a route update advertises.

use std::fmt;

use crate::cost::INFINITE_COST;
use crate::error::SipError;
use crate::neighbors::NeighborCostTable;
use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvEntry {
    pub node: NodeId,
    pub cost: u32,
}

#[derive(Debug, Clone)]
pub struct DistanceVector {
    owner: NodeId,
    slots: Vec<Option<DvEntry>>,
}

impl DistanceVector {
    /// Cost 0 to `owner` itself and the direct cost to every neighbour.
    pub fn new(owner: NodeId, nct: &NeighborCostTable, capacity: usize) -> Self {
        let mut dv = Self {
            owner,
            slots: vec![None; capacity],
        };
        let initial = std::iter::once((owner, 0))
            .chain(nct.entries().iter().map(|e| (e.node, e.cost)));
        for (node, cost) in initial {
            if dv.set_cost(node, cost).is_err() {
                log::warn!("[sip] distance vector full; node {node} left out");
            }
        }
        dv
    }

    /// Believed cost to `node`, [`INFINITE_COST`] if unknown.
    pub fn cost(&self, node: NodeId) -> u32 {
        self.entries()
            .find(|e| e.node == node)
            .map_or(INFINITE_COST, |e| e.cost)
    }

    /// Set the cost to `node`, claiming a free slot if needed.
    pub fn set_cost(&mut self, node: NodeId, cost: u32) -> Result<(), SipError> {
        let cost = cost.min(INFINITE_COST);
        if let Some(e) = self.slots.iter_mut().flatten().find(|e| e.node == node) {
            e.cost = cost;
            return Ok(());
        }
        let capacity = self.slots.len();
        let free = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(SipError::TableFull {
                table: "distance vector",
                capacity,
            })?;
        *free = Some(DvEntry { node, cost });
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = &DvEntry> {
        self.slots.iter().flatten()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut DvEntry> {
        self.slots.iter_mut().flatten()
    }
}

impl fmt::Display for DistanceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "distance vector of node {}", self.owner)?;
        for e in self.entries() {
            writeln!(f, "  to {:>4}: {:>4}", e.node, e.cost)?;
        }
        Ok(())
    }
}
