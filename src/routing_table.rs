//! Hashed destination → next-hop map.
//!
//! `dest % slots` picks a bucket; each bucket is a short chain of entries.
//! The total number of entries is capped at the node capacity so a flood of
//! bogus destinations cannot grow the table without bound.

use std::fmt;

use crate::error::SipError;
use crate::neighbors::NeighborCostTable;
use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest: NodeId,
    pub next_hop: NodeId,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    buckets: Vec<Vec<RouteEntry>>,
    len: usize,
    max_entries: usize,
}

impl RoutingTable {
    pub fn new(slots: usize, max_entries: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); slots.max(1)],
            len: 0,
            max_entries,
        }
    }

    /// Every neighbour reachable directly through itself.
    pub fn from_neighbors(nct: &NeighborCostTable, slots: usize, max_entries: usize) -> Self {
        let mut t = Self::new(slots, max_entries);
        for n in nct.ids() {
            if t.set_next_hop(n, n).is_err() {
                log::warn!("[sip] routing table full; neighbour {n} left out");
            }
        }
        t
    }

    fn bucket(&self, dest: NodeId) -> usize {
        dest as usize % self.buckets.len()
    }

    pub fn next_hop(&self, dest: NodeId) -> Option<NodeId> {
        self.buckets[self.bucket(dest)]
            .iter()
            .find(|e| e.dest == dest)
            .map(|e| e.next_hop)
    }

    /// Insert or overwrite the route to `dest`.
    pub fn set_next_hop(&mut self, dest: NodeId, next_hop: NodeId) -> Result<(), SipError> {
        let b = self.bucket(dest);
        if let Some(e) = self.buckets[b].iter_mut().find(|e| e.dest == dest) {
            e.next_hop = next_hop;
            return Ok(());
        }
        if self.len >= self.max_entries {
            return Err(SipError::TableFull {
                table: "routing",
                capacity: self.max_entries,
            });
        }
        self.buckets[b].push(RouteEntry { dest, next_hop });
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All routes, bucket by bucket.
    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.buckets.iter().flatten()
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "routing table ({} entries)", self.len)?;
        for e in self.entries() {
            writeln!(f, "  to {:>4}: next hop {:>4}", e.dest, e.next_hop)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colliding_destinations_chain_in_one_bucket() {
        let mut t = RoutingTable::new(10, 10);
        t.set_next_hop(3, 2).unwrap();
        t.set_next_hop(13, 4).unwrap();
        t.set_next_hop(23, 5).unwrap();
        assert_eq!(t.next_hop(3), Some(2));
        assert_eq!(t.next_hop(13), Some(4));
        assert_eq!(t.next_hop(23), Some(5));
        assert_eq!(t.next_hop(33), None);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn overwrite_keeps_single_entry() {
        let mut t = RoutingTable::new(10, 10);
        t.set_next_hop(7, 1).unwrap();
        t.set_next_hop(7, 2).unwrap();
        assert_eq!(t.next_hop(7), Some(2));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn entry_cap_is_enforced() {
        let mut t = RoutingTable::new(4, 2);
        t.set_next_hop(1, 1).unwrap();
        t.set_next_hop(2, 2).unwrap();
        assert!(matches!(
            t.set_next_hop(3, 3),
            Err(SipError::TableFull { table: "routing", capacity: 2 })
        ));
        t.set_next_hop(2, 1).unwrap();
    }
}
