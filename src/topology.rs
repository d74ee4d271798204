//! Static overlay topology.
//!
//! A topology file lists one undirected link per line:
//!
//! ```text
//! # hostA       hostB        cost
//! 10.0.0.185    10.0.0.186   3
//! 186           187          1
//! ```
//!
//! Hosts are node ids or IPv4 addresses; an address maps to its last octet.
//! Blank lines and `#` comments are ignored. The routing engine only reads
//! a [`Topology`]; it never mutates it.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::cost::INFINITE_COST;
use crate::error::TopologyError;
use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub a: NodeId,
    pub b: NodeId,
    pub cost: u32,
}

/// The overlay graph as seen from one node.
#[derive(Debug, Clone)]
pub struct Topology {
    me: NodeId,
    links: Vec<Link>,
}

/// Map a host name to a node id: a bare integer is taken as is, an IPv4
/// address contributes its last octet.
pub fn node_id_from_name(name: &str) -> Result<NodeId, TopologyError> {
    if let Ok(id) = name.parse::<NodeId>() {
        return Ok(id);
    }
    name.parse::<Ipv4Addr>()
        .map(|ip| NodeId::from(ip.octets()[3]))
        .map_err(|_| TopologyError::UnknownHost(name.to_owned()))
}

impl Topology {
    /// Build from `(a, b, cost)` triples.
    pub fn from_edges(me: NodeId, edges: &[(NodeId, NodeId, u32)]) -> Self {
        Self {
            me,
            links: edges
                .iter()
                .map(|&(a, b, cost)| Link { a, b, cost })
                .collect(),
        }
    }

    pub fn parse(me: NodeId, text: &str) -> Result<Self, TopologyError> {
        let mut links = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [a, b, cost] = fields[..] else {
                return Err(TopologyError::Parse {
                    line: idx + 1,
                    reason: format!("expected `hostA hostB cost`, got {} field(s)", fields.len()),
                });
            };
            let cost = cost.parse::<u32>().map_err(|e| TopologyError::Parse {
                line: idx + 1,
                reason: format!("bad cost `{cost}`: {e}"),
            })?;
            links.push(Link {
                a: node_id_from_name(a)?,
                b: node_id_from_name(b)?,
                cost,
            });
        }
        log::debug!("[sip] topology: {} link(s) parsed for node {me}", links.len());
        Ok(Self { me, links })
    }

    pub fn load(me: NodeId, path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        Self::parse(me, &std::fs::read_to_string(path)?)
    }

    /// The same graph seen from another node.
    pub fn with_node(&self, me: NodeId) -> Self {
        Self {
            me,
            links: self.links.clone(),
        }
    }

    pub fn my_node_id(&self) -> NodeId {
        self.me
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Direct neighbours of this node in ascending order, without duplicates.
    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.links
            .iter()
            .filter_map(|l| match (l.a == self.me, l.b == self.me) {
                (true, false) => Some(l.b),
                (false, true) => Some(l.a),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Cost of the direct link between `a` and `b`, or [`INFINITE_COST`].
    /// If the file lists a pair twice the cheaper entry wins.
    pub fn link_cost(&self, a: NodeId, b: NodeId) -> u32 {
        self.links
            .iter()
            .filter(|l| (l.a == a && l.b == b) || (l.a == b && l.b == a))
            .map(|l| l.cost.min(INFINITE_COST))
            .min()
            .unwrap_or(INFINITE_COST)
    }

    /// Every node mentioned in the topology, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.links
            .iter()
            .flat_map(|l| [l.a, l.b])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
