use std::collections::{HashMap, HashSet};

use uom::si::f64::Time;
use uom::si::time::millisecond;

use super::resources::{CapacityError, ResourceCapacity, ResourceRequirements};
use crate::{NodeId, ServiceId};

/// One-way delay assumed towards nodes we have no measurement for.
const DEFAULT_DELAY_MS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Edge,
    Cloud,
}

/// A compute node of the fleet: capacity, measured delays towards its
/// peers, and the set of services it currently hosts.
#[derive(Debug, Clone)]
pub struct ComputeNode {
    id:       NodeId,
    kind:     NodeKind,
    capacity: ResourceCapacity,
    delays:   HashMap<NodeId, Time>,
    services: HashSet<ServiceId>,
}

impl ComputeNode {
    pub fn new(id: NodeId, kind: NodeKind, capacity: ResourceCapacity) -> Self {
        Self { id, kind, capacity, delays: HashMap::new(), services: HashSet::new() }
    }

    /// An edge node with the typical edge capacity.
    pub fn edge(id: NodeId) -> Self {
        Self::new(id, NodeKind::Edge, ResourceCapacity::edge_default())
    }

    /// A cloud node with the typical cloud capacity.
    pub fn cloud(id: NodeId) -> Self {
        Self::new(id, NodeKind::Cloud, ResourceCapacity::cloud_default())
    }

    pub fn id(&self) -> &NodeId { &self.id }

    pub fn kind(&self) -> NodeKind { self.kind }

    pub fn capacity(&self) -> &ResourceCapacity { &self.capacity }

    pub fn capacity_mut(&mut self) -> &mut ResourceCapacity {
        &mut self.capacity
    }

    pub fn set_delay(&mut self, to: NodeId, delay: Time) {
        self.delays.insert(to, delay);
    }

    /// One-way delay towards `to`, defaulting when unmeasured.
    pub fn delay_to(&self, to: &NodeId) -> Time {
        self.delays
            .get(to)
            .copied()
            .unwrap_or_else(|| Time::new::<millisecond>(DEFAULT_DELAY_MS))
    }

    pub fn hosts(&self, service: &ServiceId) -> bool {
        self.services.contains(service)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.iter()
    }

    pub fn service_count(&self) -> usize { self.services.len() }

    /// Reserve capacity and take ownership of the service, atomically for
    /// this node.
    pub fn deploy(
        &mut self,
        service: ServiceId,
        requirements: &ResourceRequirements,
    ) -> Result<(), CapacityError> {
        self.capacity.allocate(requirements)?;
        self.services.insert(service);
        Ok(())
    }

    /// Drop the service and return its capacity. A no-op when the service
    /// is not hosted here.
    pub fn withdraw(
        &mut self,
        service: &ServiceId,
        requirements: &ResourceRequirements,
    ) {
        if self.services.remove(service) {
            self.capacity.release(requirements);
        }
    }

    /// Weighted utilization, biased towards the typical bottlenecks.
    pub fn load_factor(&self) -> f64 {
        0.5 * self.capacity.cpu_utilization()
            + 0.3 * self.capacity.memory_utilization()
            + 0.2 * self.capacity.bandwidth_utilization()
    }

    pub fn is_overloaded(&self, threshold: f64) -> bool {
        self.capacity.is_overloaded(threshold)
    }
}
