use std::collections::HashMap;

use dashmap::DashMap;
use model::{NodeId, ServiceId};

/// The partial mapping service → hosting node, owned by the deployer.
/// For every entry the node's host set contains the service and its
/// capacity has the service's demand deducted.
#[derive(Debug, Default)]
pub struct PlacementTable {
    assignments: DashMap<ServiceId, NodeId>,
}

impl PlacementTable {
    pub fn new() -> Self { Self::default() }

    pub fn assign(&self, service: ServiceId, node: NodeId) {
        self.assignments.insert(service, node);
    }

    pub fn remove(&self, service: &ServiceId) -> Option<NodeId> {
        self.assignments.remove(service).map(|(_, node)| node)
    }

    pub fn node_of(&self, service: &ServiceId) -> Option<NodeId> {
        self.assignments.get(service).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, service: &ServiceId) -> bool {
        self.assignments.contains_key(service)
    }

    /// Whether two services currently share a node. Unplaced services are
    /// colocated with nothing.
    pub fn colocated(&self, a: &ServiceId, b: &ServiceId) -> bool {
        match (self.node_of(a), self.node_of(b)) {
            (Some(node_a), Some(node_b)) => node_a == node_b,
            _ => false,
        }
    }

    pub fn as_map(&self) -> HashMap<ServiceId, NodeId> {
        self.assignments
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize { self.assignments.len() }

    pub fn is_empty(&self) -> bool { self.assignments.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colocation_requires_both_to_be_placed() {
        let placement = PlacementTable::new();
        placement.assign("a".into(), "n1".into());

        assert!(!placement.colocated(&"a".into(), &"b".into()));

        placement.assign("b".into(), "n1".into());
        assert!(placement.colocated(&"a".into(), &"b".into()));

        placement.assign("b".into(), "n2".into());
        assert!(!placement.colocated(&"a".into(), &"b".into()));
    }

    #[test]
    fn remove_returns_the_previous_host() {
        let placement = PlacementTable::new();
        placement.assign("a".into(), "n1".into());

        assert_eq!(placement.remove(&"a".into()), Some("n1".into()));
        assert_eq!(placement.remove(&"a".into()), None);
        assert!(placement.is_empty());
    }
}
