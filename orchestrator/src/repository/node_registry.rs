use dashmap::DashMap;
use model::domain::node::ComputeNode;
use model::domain::resources::{CapacityError, ResourceRequirements};
use model::{NodeId, ServiceId};
use uom::si::f64::Time;

use model::domain::core_count::core;
use uom::si::information::megabyte;
use uom::si::information_rate::megabit_per_second;

/// Reference points for the capability score: a mid-size node on every
/// axis maps to a weight contribution of its axis factor.
const CAPABILITY_CPU_SCALE: f64 = 10.0;
const CAPABILITY_MEMORY_SCALE_MB: f64 = 8000.0;
const CAPABILITY_BANDWIDTH_SCALE_MBPS: f64 = 1000.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

/// The fleet: every registered compute node, keyed by id. All mutation
/// goes through the map entry, so capacity changes are serialized per
/// node.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, ComputeNode>,
}

impl NodeRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, node: ComputeNode) {
        self.nodes.insert(node.id().clone(), node);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Node ids in ascending order, the deterministic candidate order.
    pub fn sorted_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> =
            self.nodes.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Run a closure against a node without exposing the map guard.
    pub fn with_node<R>(
        &self,
        id: &NodeId,
        f: impl FnOnce(&ComputeNode) -> R,
    ) -> Result<R, Error> {
        let entry = self
            .nodes
            .get(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))?;
        Ok(f(entry.value()))
    }

    pub fn with_node_mut<R>(
        &self,
        id: &NodeId,
        f: impl FnOnce(&mut ComputeNode) -> R,
    ) -> Result<R, Error> {
        let mut entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))?;
        Ok(f(entry.value_mut()))
    }

    /// Reserve capacity on `node` and record it as the service's host.
    pub fn deploy(
        &self,
        service: &ServiceId,
        requirements: &ResourceRequirements,
        node: &NodeId,
    ) -> Result<(), Error> {
        self.with_node_mut(node, |n| {
            n.deploy(service.clone(), requirements)
        })?
        .map_err(Error::from)
    }

    /// Drop the service from `node` and return its capacity.
    pub fn withdraw(
        &self,
        service: &ServiceId,
        requirements: &ResourceRequirements,
        node: &NodeId,
    ) -> Result<(), Error> {
        self.with_node_mut(node, |n| n.withdraw(service, requirements))
    }

    pub fn set_delay(
        &self,
        from: &NodeId,
        to: NodeId,
        delay: Time,
    ) -> Result<(), Error> {
        self.with_node_mut(from, |n| n.set_delay(to, delay))
    }

    /// One-way delay recorded at `from` towards `to`; unmeasured pairs
    /// fall back to the node's default.
    pub fn delay_between(
        &self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<Time, Error> {
        self.with_node(from, |n| n.delay_to(to))
    }

    /// Raw-capacity score used to weigh a node's vote during federated
    /// aggregation.
    pub fn capability(&self, id: &NodeId) -> Result<f64, Error> {
        self.with_node(id, |n| {
            let capacity = n.capacity();
            0.5 * (capacity.total_cpu().get::<core>() / CAPABILITY_CPU_SCALE)
                + 0.3
                    * (capacity.total_memory().get::<megabyte>()
                        / CAPABILITY_MEMORY_SCALE_MB)
                + 0.2
                    * (capacity
                        .total_bandwidth()
                        .get::<megabit_per_second>()
                        / CAPABILITY_BANDWIDTH_SCALE_MBPS)
        })
    }

    pub fn for_each(&self, mut f: impl FnMut(&ComputeNode)) {
        for entry in self.nodes.iter() {
            f(entry.value());
        }
    }
}

#[cfg(test)]
mod tests {
    use uom::si::time::millisecond;

    use super::*;

    fn registry() -> NodeRegistry {
        let registry = NodeRegistry::new();
        registry.register(ComputeNode::edge(NodeId::from("edge-1")));
        registry.register(ComputeNode::cloud(NodeId::from("cloud-1")));
        registry
    }

    #[test]
    fn sorted_ids_are_ascending() {
        let registry = registry();
        assert_eq!(
            registry.sorted_ids(),
            vec![NodeId::from("cloud-1"), NodeId::from("edge-1")]
        );
    }

    #[test]
    fn deploy_and_withdraw_mutate_the_hosted_set() {
        let registry = registry();
        let svc = ServiceId::from("svc");
        let reqs = ResourceRequirements::new(1.0, 1000.0, 10.0);
        let node = NodeId::from("edge-1");

        registry.deploy(&svc, &reqs, &node).unwrap();
        assert!(registry.with_node(&node, |n| n.hosts(&svc)).unwrap());

        registry.withdraw(&svc, &reqs, &node).unwrap();
        assert!(!registry.with_node(&node, |n| n.hosts(&svc)).unwrap());
        assert_eq!(
            registry
                .with_node(&node, |n| n.capacity().cpu_utilization())
                .unwrap(),
            0.0
        );
    }

    #[test]
    fn deploy_on_unknown_node_is_not_found() {
        let registry = registry();
        let err = registry
            .deploy(
                &ServiceId::from("svc"),
                &ResourceRequirements::new(1.0, 1.0, 1.0),
                &NodeId::from("nope"),
            )
            .unwrap_err();
        assert_eq!(err, Error::NodeNotFound(NodeId::from("nope")));
    }

    #[test]
    fn capability_favors_the_cloud() {
        let registry = registry();
        let edge = registry.capability(&NodeId::from("edge-1")).unwrap();
        let cloud = registry.capability(&NodeId::from("cloud-1")).unwrap();

        assert!((edge - 0.52).abs() < 1e-9);
        assert!((cloud - 2.2).abs() < 1e-9);
    }

    #[test]
    fn delays_default_when_unmeasured() {
        let registry = registry();
        registry
            .set_delay(
                &NodeId::from("edge-1"),
                NodeId::from("cloud-1"),
                Time::new::<millisecond>(30.0),
            )
            .unwrap();

        let measured = registry
            .delay_between(&NodeId::from("edge-1"), &NodeId::from("cloud-1"))
            .unwrap();
        assert!((measured.get::<millisecond>() - 30.0).abs() < 1e-9);

        let unmeasured = registry
            .delay_between(&NodeId::from("cloud-1"), &NodeId::from("edge-1"))
            .unwrap();
        assert!((unmeasured.get::<millisecond>() - 100.0).abs() < 1e-9);
    }
}
