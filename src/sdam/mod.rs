//! Node / connection-set state (second half of C6), per spec §3 "Node / connection set": a set of
//! connections keyed by host:port, each carrying an observed status, with the invariant that at
//! most one node in a replica-set view is `Primary` at any observation.

use std::{collections::HashMap, fmt};

/// The host:port address identifying a node, per spec §6's connection-string grammar.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The observed status of a node, per spec §3.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeStatus {
    Unknown,
    Connecting,
    Primary,
    Secondary,
    Unreachable,
}

/// A single node's observed state within a replica-set view.
#[derive(Clone, Debug)]
pub struct Node {
    pub address: ServerAddress,
    pub status: NodeStatus,
    pub max_wire_version: Option<crate::wire::WireVersion>,
}

impl Node {
    pub fn new(address: ServerAddress) -> Self {
        Self { address, status: NodeStatus::Unknown, max_wire_version: None }
    }
}

/// A replica-set (or single-node) view, enforcing the at-most-one-primary invariant from spec §3.
#[derive(Clone, Debug, Default)]
pub struct TopologyDescription {
    nodes: HashMap<ServerAddress, Node>,
}

impl TopologyDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or updates a node's observed status.
    ///
    /// If `status` is `Primary`, any other node previously recorded as `Primary` is demoted to
    /// `Unknown` first, preserving "at most one primary" rather than permitting the caller to
    /// violate it.
    pub fn update_status(&mut self, address: ServerAddress, status: NodeStatus) {
        if status == NodeStatus::Primary {
            for node in self.nodes.values_mut() {
                if node.address != address && node.status == NodeStatus::Primary {
                    crate::trace::debug!(address = %node.address, "demoted from primary");
                    node.status = NodeStatus::Unknown;
                }
            }
        }
        crate::trace::debug!(address = %address, status = ?status, "node status updated");
        self.nodes
            .entry(address.clone())
            .and_modify(|n| n.status = status)
            .or_insert_with(|| {
                let mut n = Node::new(address);
                n.status = status;
                n
            });
    }

    pub fn update_wire_version(
        &mut self,
        address: &ServerAddress,
        wire_version: crate::wire::WireVersion,
    ) {
        if let Some(node) = self.nodes.get_mut(address) {
            node.max_wire_version = Some(wire_version);
        }
    }

    pub fn node(&self, address: &ServerAddress) -> Option<&Node> {
        self.nodes.get(address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// The current primary, if any. At most one node can hold this status by construction.
    pub fn primary(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.status == NodeStatus::Primary)
    }

    /// Nodes matching the given selection criteria, in no particular order.
    pub fn eligible<'a>(
        &'a self,
        criteria: &'a crate::selection_criteria::SelectionCriteria,
    ) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |n| criteria.matches(&n.address, n.status))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::selection_criteria::{ReadPreference, SelectionCriteria};

    #[test]
    fn at_most_one_primary_invariant_holds_across_updates() {
        let mut topo = TopologyDescription::new();
        let a = ServerAddress::new("a", 27017);
        let b = ServerAddress::new("b", 27017);

        topo.update_status(a.clone(), NodeStatus::Primary);
        topo.update_status(b.clone(), NodeStatus::Primary);

        let primaries: Vec<_> = topo.nodes().filter(|n| n.status == NodeStatus::Primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].address, b);
        assert_eq!(topo.node(&a).unwrap().status, NodeStatus::Unknown);
    }

    #[test]
    fn eligible_filters_by_read_preference() {
        let mut topo = TopologyDescription::new();
        let a = ServerAddress::new("a", 27017);
        let b = ServerAddress::new("b", 27017);
        topo.update_status(a.clone(), NodeStatus::Primary);
        topo.update_status(b.clone(), NodeStatus::Secondary);

        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Secondary);
        let eligible: Vec<_> = topo.eligible(&criteria).map(|n| n.address.clone()).collect();
        assert_eq!(eligible, vec![b]);
    }
}
