use std::collections::{HashMap, HashSet};

use model::domain::service::{DependencyEdge, Microservice};
use model::ServiceId;
use uom::si::f64::{Information, Time};
use uom::si::information::megabyte;
use uom::si::time::millisecond;

/// Local transfer is one order of magnitude faster than remote; both
/// divisors are part of the latency contract.
const LOCAL_TRANSFER_DIVISOR: f64 = 1000.0;
const REMOTE_TRANSFER_DIVISOR: f64 = 100.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceId),
    #[error("adding {from_id} -> {target} would close a dependency cycle")]
    CycleDetected { from_id: ServiceId, target: ServiceId },
    #[error("dependency edges need a positive data volume and frequency")]
    InvalidEdgeWeight,
}

/// The service dependency topology: an arena of services and a weighted
/// adjacency list, acyclic by construction.
///
/// Iteration order is everywhere the insertion order, so path enumeration
/// and residual placement stay deterministic.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    services:        HashMap<ServiceId, Microservice>,
    insertion_order: Vec<ServiceId>,
    adjacency:       HashMap<ServiceId, Vec<DependencyEdge>>,
}

impl DependencyGraph {
    pub fn new() -> Self { Self::default() }

    pub fn add_service(&mut self, service: Microservice) {
        let id = service.id().clone();
        if self.services.insert(id.clone(), service).is_none() {
            self.insertion_order.push(id.clone());
        }
        self.adjacency.entry(id).or_default();
    }

    /// Insert a weighted dependency edge. Fails on unknown endpoints,
    /// non-positive weights, and edges that would close a cycle.
    pub fn add_dependency(
        &mut self,
        source: ServiceId,
        target: ServiceId,
        data_volume: Information,
        frequency: f64,
    ) -> Result<(), Error> {
        if !self.services.contains_key(&source) {
            return Err(Error::ServiceNotFound(source));
        }
        if !self.services.contains_key(&target) {
            return Err(Error::ServiceNotFound(target));
        }
        if data_volume <= Information::new::<megabyte>(0.0)
            || frequency <= 0.0
        {
            return Err(Error::InvalidEdgeWeight);
        }
        if source == target || self.reaches(&target, &source) {
            return Err(Error::CycleDetected { from_id: source, target });
        }

        self.adjacency.entry(source.clone()).or_default().push(
            DependencyEdge { source, target, data_volume, frequency },
        );
        Ok(())
    }

    fn reaches(&self, from: &ServiceId, to: &ServiceId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(edges) = self.adjacency.get(&current) {
                stack.extend(edges.iter().map(|e| e.target.clone()));
            }
        }
        false
    }

    /// Every simple path from `source` to `target`, eagerly collected.
    /// Emission order follows edge insertion order.
    pub fn all_paths(
        &self,
        source: &ServiceId,
        target: &ServiceId,
    ) -> Result<Vec<Vec<ServiceId>>, Error> {
        if !self.services.contains_key(source) {
            return Err(Error::ServiceNotFound(source.clone()));
        }
        if !self.services.contains_key(target) {
            return Err(Error::ServiceNotFound(target.clone()));
        }

        let mut paths = Vec::new();
        let mut current_path = vec![source.clone()];
        let mut visited = HashSet::new();
        self.collect_paths(
            source,
            target,
            &mut visited,
            &mut current_path,
            &mut paths,
        );
        Ok(paths)
    }

    fn collect_paths(
        &self,
        current: &ServiceId,
        target: &ServiceId,
        visited: &mut HashSet<ServiceId>,
        current_path: &mut Vec<ServiceId>,
        paths: &mut Vec<Vec<ServiceId>>,
    ) {
        if current == target {
            paths.push(current_path.clone());
            return;
        }

        visited.insert(current.clone());
        if let Some(edges) = self.adjacency.get(current) {
            for edge in edges {
                if !visited.contains(&edge.target) {
                    current_path.push(edge.target.clone());
                    self.collect_paths(
                        &edge.target,
                        target,
                        visited,
                        current_path,
                        paths,
                    );
                    current_path.pop();
                }
            }
        }
        visited.remove(current);
    }

    /// End-to-end latency of a linear walk: execution times plus the
    /// communication time of every traversed edge. `colocated` answers
    /// whether two services currently share a node.
    pub fn sequential_latency<F>(
        &self,
        path: &[ServiceId],
        colocated: F,
    ) -> Result<Time, Error>
    where
        F: Fn(&ServiceId, &ServiceId) -> bool,
    {
        let mut total = Time::new::<millisecond>(0.0);

        for service_id in path {
            let service = self
                .services
                .get(service_id)
                .ok_or_else(|| Error::ServiceNotFound(service_id.clone()))?;
            total += service.execution_time();
        }

        for pair in path.windows(2) {
            let Some(edge) = self.find_edge(&pair[0], &pair[1]) else {
                continue;
            };
            total += communication_time(edge, colocated(&pair[0], &pair[1]));
        }

        Ok(total)
    }

    pub fn find_edge(
        &self,
        source: &ServiceId,
        target: &ServiceId,
    ) -> Option<&DependencyEdge> {
        self.adjacency
            .get(source)?
            .iter()
            .find(|edge| &edge.target == target)
    }

    /// Outgoing dependency edges of a service; empty for leaves and for
    /// unknown ids.
    pub fn dependencies_of(&self, service: &ServiceId) -> &[DependencyEdge] {
        self.adjacency
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Incoming dependency edges of a service, in producer insertion
    /// order.
    pub fn dependents_of(
        &self,
        service: &ServiceId,
    ) -> Vec<&DependencyEdge> {
        self.insertion_order
            .iter()
            .flat_map(|id| self.adjacency.get(id))
            .flatten()
            .filter(|edge| &edge.target == service)
            .collect()
    }

    pub fn service(&self, id: &ServiceId) -> Option<&Microservice> {
        self.services.get(id)
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    /// Services in insertion order.
    pub fn services(&self) -> impl Iterator<Item = &Microservice> {
        self.insertion_order
            .iter()
            .filter_map(move |id| self.services.get(id))
    }

    pub fn service_ids(&self) -> &[ServiceId] { &self.insertion_order }

    pub fn len(&self) -> usize { self.services.len() }

    pub fn is_empty(&self) -> bool { self.services.is_empty() }

    /// Chain entry points: services nothing depends on.
    pub fn sources(&self) -> Vec<ServiceId> {
        let mut with_incoming = HashSet::new();
        for edges in self.adjacency.values() {
            for edge in edges {
                with_incoming.insert(edge.target.clone());
            }
        }
        self.insertion_order
            .iter()
            .filter(|id| !with_incoming.contains(*id))
            .cloned()
            .collect()
    }

    /// Chain exit points: services that depend on nothing.
    pub fn sinks(&self) -> Vec<ServiceId> {
        self.insertion_order
            .iter()
            .filter(|id| {
                self.adjacency
                    .get(*id)
                    .map(Vec::is_empty)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

fn communication_time(edge: &DependencyEdge, colocated: bool) -> Time {
    let volume_mb = edge.data_volume.get::<megabyte>();
    let divisor = if colocated {
        LOCAL_TRANSFER_DIVISOR
    } else {
        REMOTE_TRANSFER_DIVISOR
    };
    Time::new::<millisecond>(volume_mb / divisor)
}
