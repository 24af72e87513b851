use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use model::domain::resources::ResourceRequirements;
use model::domain::service::Microservice;
use model::{ChainId, NodeId, ServiceId};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uom::si::information::megabyte;
use uom::si::ratio::ratio;
use uom::si::time::millisecond;

use crate::repository::dependency_graph::{self, DependencyGraph};
use crate::repository::node_registry::{self, NodeRegistry};
use crate::repository::placement::PlacementTable;
use crate::service::critical_path::{CriticalPathAnalyzer, PathCriticality};
use crate::service::federation::{FederatedOptimizer, NodeTelemetry};
use crate::service::monitor::Monitor;

/// Cost mix of the placement heuristic.
const COMMUNICATION_WEIGHT: f64 = 0.5;
const RESOURCE_WEIGHT: f64 = 0.3;
const LOAD_BALANCE_WEIGHT: f64 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] dependency_graph::Error),
    #[error(transparent)]
    Registry(#[from] node_registry::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnplacedReason {
    InsufficientCapacity,
}

impl fmt::Display for UnplacedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnplacedReason::InsufficientCapacity => {
                write!(f, "insufficient capacity")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub placement:         HashMap<ServiceId, NodeId>,
    pub unplaced:          Vec<(ServiceId, UnplacedReason)>,
    pub refinement_rounds: usize,
    pub converged:         bool,
}

#[derive(Debug, Clone)]
pub struct RefinementSettings {
    pub max_iterations:              usize,
    pub convergence_threshold:       f64,
    pub migration_improvement_ratio: f64,
}

/// Topology-aware deployer. Placement runs in four phases: critical-path
/// identification, critical-service placement, residual placement, and
/// federated refinement. Not reentrant; one deployment at a time.
pub struct DeploymentService {
    graph:      Arc<DependencyGraph>,
    registry:   Arc<NodeRegistry>,
    placement:  Arc<PlacementTable>,
    analyzer:   Arc<CriticalPathAnalyzer>,
    optimizer:  Arc<FederatedOptimizer>,
    monitor:    Arc<Monitor>,
    settings:   RefinementSettings,
    kept_paths: RwLock<Vec<(ChainId, PathCriticality)>>,
    /// What was actually reserved per placed service. Demand is inflated
    /// by path criticality at allocation time, so releases must use the
    /// recorded amount, not the base requirements.
    allocated:  DashMap<ServiceId, ResourceRequirements>,
}

impl DeploymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<DependencyGraph>,
        registry: Arc<NodeRegistry>,
        placement: Arc<PlacementTable>,
        analyzer: Arc<CriticalPathAnalyzer>,
        optimizer: Arc<FederatedOptimizer>,
        monitor: Arc<Monitor>,
        settings: RefinementSettings,
    ) -> Self {
        Self {
            graph,
            registry,
            placement,
            analyzer,
            optimizer,
            monitor,
            settings,
            kept_paths: RwLock::new(Vec::new()),
            allocated: DashMap::new(),
        }
    }

    /// Run all four phases and return the resulting placement, the
    /// services that found no host, and how refinement ended.
    pub async fn execute_deployment(
        &self,
    ) -> Result<DeploymentOutcome, Error> {
        // Phase A: rank chains under the current parameter vector.
        self.identify_critical_paths().await?;

        // Phase B: walk the kept paths, most critical first.
        let critical_order: Vec<Vec<ServiceId>> = self
            .kept_paths
            .read()
            .await
            .iter()
            .map(|(_, path)| path.services.clone())
            .collect();
        for path in critical_order {
            for service_id in path {
                self.place_if_absent(&service_id).await?;
            }
        }

        // Phase C: everything else, in graph insertion order.
        for service_id in self.graph.service_ids() {
            self.place_if_absent(service_id).await?;
        }

        let unplaced: Vec<(ServiceId, UnplacedReason)> = self
            .graph
            .service_ids()
            .iter()
            .filter(|id| !self.placement.contains(id))
            .map(|id| (id.clone(), UnplacedReason::InsufficientCapacity))
            .collect();

        // Phase D: federated refinement until the parameter vector
        // settles.
        let mut converged = false;
        let mut rounds = 0;
        for _ in 0..self.settings.max_iterations {
            let telemetry = self.collect_telemetry().await;
            let delta = self.optimizer.execute_round(&telemetry).await;

            self.identify_critical_paths().await?;
            self.refine_placement().await?;
            rounds += 1;

            if delta < self.settings.convergence_threshold {
                converged = true;
                break;
            }
        }
        if self.settings.max_iterations > 0 && !converged {
            warn!(
                rounds,
                "refinement did not converge, returning the last placement"
            );
        }

        Ok(DeploymentOutcome {
            placement: self.placement.as_map(),
            unplaced,
            refinement_rounds: rounds,
            converged,
        })
    }

    /// The kept (top-ranked) path per chain, in chain order.
    pub async fn critical_paths(&self) -> Vec<(ChainId, Vec<ServiceId>)> {
        self.kept_paths
            .read()
            .await
            .iter()
            .map(|(chain, path)| (chain.clone(), path.services.clone()))
            .collect()
    }

    /// Phase A: push the global parameters into the analyzer, then keep
    /// the top-ranked path for every (source, sink) pair.
    async fn identify_critical_paths(&self) -> Result<(), Error> {
        let params = self.optimizer.global_parameters().await;
        self.analyzer
            .update_weights(
                params.temporal_weight,
                params.resource_weight,
                params.dependency_weight,
            )
            .await;
        self.analyzer
            .set_threshold(params.critical_path_threshold)
            .await;

        let sources = self.graph.sources();
        let sinks = self.graph.sinks();

        let mut kept = Vec::new();
        for source in &sources {
            for sink in &sinks {
                let ranked = self.analyzer.rank_paths(source, sink).await?;
                if let Some(top) = ranked.into_iter().next() {
                    kept.push((
                        ChainId::for_endpoints(source, sink),
                        top,
                    ));
                }
            }
        }

        *self.kept_paths.write().await = kept;
        Ok(())
    }

    /// Criticality of the most critical kept path the service sits on;
    /// 0 for services on no kept path.
    async fn path_criticality_of(&self, service_id: &ServiceId) -> f64 {
        self.kept_paths
            .read()
            .await
            .iter()
            .filter(|(_, path)| path.services.contains(service_id))
            .map(|(_, path)| path.score)
            .fold(0.0, f64::max)
    }

    /// The demand actually reserved for a service: its base requirements
    /// inflated by the learned scaling factor in proportion to its path
    /// criticality.
    async fn effective_requirements(
        &self,
        service: &Microservice,
    ) -> ResourceRequirements {
        let criticality = self.path_criticality_of(service.id()).await;
        self.optimizer
            .scaled_allocation(service.requirements(), criticality)
            .await
    }

    async fn place_if_absent(
        &self,
        service_id: &ServiceId,
    ) -> Result<(), Error> {
        if self.placement.contains(service_id) {
            return Ok(());
        }
        let service = self.graph.service(service_id).ok_or_else(|| {
            dependency_graph::Error::ServiceNotFound(service_id.clone())
        })?;
        let demand = self.effective_requirements(service).await;

        let candidates = self.fitting_nodes(&demand);
        let Some(best) =
            self.cheapest_node(service_id, &demand, &candidates)?
        else {
            debug!(service = %service_id, "no node fits, leaving unplaced");
            return Ok(());
        };

        self.registry.deploy(service_id, &demand, &best)?;
        self.allocated.insert(service_id.clone(), demand);
        self.placement.assign(service_id.clone(), best);
        Ok(())
    }

    /// Nodes whose current availables satisfy the given demand, in
    /// ascending id order.
    fn fitting_nodes(&self, demand: &ResourceRequirements) -> Vec<NodeId> {
        self.registry
            .sorted_ids()
            .into_iter()
            .filter(|node| {
                self.registry
                    .with_node(node, |n| demand.fits(n.capacity()))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Lowest-cost candidate; candidates come in id order and ties keep
    /// the first.
    fn cheapest_node(
        &self,
        service_id: &ServiceId,
        demand: &ResourceRequirements,
        candidates: &[NodeId],
    ) -> Result<Option<NodeId>, Error> {
        let mut best: Option<(NodeId, f64)> = None;
        for node in candidates {
            let cost = self.placement_cost(service_id, demand, node)?;
            match &best {
                Some((_, lowest)) if cost >= *lowest => {}
                _ => best = Some((node.clone(), cost)),
            }
        }
        Ok(best.map(|(node, _)| node))
    }

    /// Placement cost of hosting `service_id` with `demand` on
    /// `candidate`: `0.5 * communication + 0.3 * resource + 0.2 * load`.
    ///
    /// Communication sums `delay * volume * frequency` over every
    /// dependency edge incident to the service whose other endpoint is
    /// already placed on a different node; colocated and unplaced peers
    /// cost nothing. The resource term is the product of the per-axis
    /// demand/total ratios, which disproportionately punishes nodes tight
    /// on any single axis; callers pass the same criticality-scaled
    /// demand they would deploy, so the cost judges what would actually
    /// be reserved. The load term is the sum of the candidate's current
    /// utilizations.
    ///
    /// A node already hosting the service is priced as if the service
    /// were not there (its recorded reservation released), so migration
    /// comparisons weigh both sides the same way.
    fn placement_cost(
        &self,
        service_id: &ServiceId,
        demand: &ResourceRequirements,
        candidate: &NodeId,
    ) -> Result<f64, Error> {
        let mut communication = 0.0;
        for edge in self.graph.dependencies_of(service_id) {
            communication +=
                self.edge_cost(candidate, &edge.target, edge)?;
        }
        for edge in self.graph.dependents_of(service_id) {
            communication +=
                self.edge_cost(candidate, &edge.source, edge)?;
        }

        let reserved = self
            .allocated
            .get(service_id)
            .map(|entry| *entry.value())
            .or_else(|| {
                self.graph
                    .service(service_id)
                    .map(|service| *service.requirements())
            });

        let (resource, load) =
            self.registry.with_node(candidate, |node| {
                let mut capacity = node.capacity().clone();
                if node.hosts(service_id) {
                    if let Some(reserved) = &reserved {
                        capacity.release(reserved);
                    }
                }
                let resource = (demand.cpu / capacity.total_cpu())
                    .get::<ratio>()
                    * (demand.memory / capacity.total_memory())
                        .get::<ratio>()
                    * (demand.bandwidth / capacity.total_bandwidth())
                        .get::<ratio>();
                let load = capacity.cpu_utilization()
                    + capacity.memory_utilization()
                    + capacity.bandwidth_utilization();
                (resource, load)
            })?;

        Ok(COMMUNICATION_WEIGHT * communication
            + RESOURCE_WEIGHT * resource
            + LOAD_BALANCE_WEIGHT * load)
    }

    fn edge_cost(
        &self,
        candidate: &NodeId,
        peer: &ServiceId,
        edge: &model::domain::service::DependencyEdge,
    ) -> Result<f64, Error> {
        let Some(peer_node) = self.placement.node_of(peer) else {
            return Ok(0.0);
        };
        if &peer_node == candidate {
            return Ok(0.0);
        }
        let delay = self.registry.delay_between(candidate, &peer_node)?;
        Ok(delay.get::<millisecond>()
            * edge.data_volume.get::<megabyte>()
            * edge.frequency)
    }

    /// Phase D migration sweep: every service on a kept path, at most
    /// once per round, moves to any fitting node that beats its current
    /// cost by the configured margin. A migration allocates on the
    /// destination before releasing the source, so a destination that
    /// filled up in the meantime aborts the move with nothing changed.
    async fn refine_placement(&self) -> Result<(), Error> {
        let paths: Vec<Vec<ServiceId>> = self
            .kept_paths
            .read()
            .await
            .iter()
            .map(|(_, path)| path.services.clone())
            .collect();

        let mut processed = HashSet::new();
        for path in paths {
            for service_id in path {
                if !processed.insert(service_id.clone()) {
                    continue;
                }
                let Some(current_node) =
                    self.placement.node_of(&service_id)
                else {
                    continue;
                };
                let Some(service) = self.graph.service(&service_id) else {
                    continue;
                };
                let demand = self.effective_requirements(service).await;

                let current_cost = self.placement_cost(
                    &service_id,
                    &demand,
                    &current_node,
                )?;
                for candidate in self.fitting_nodes(&demand) {
                    if candidate == current_node {
                        continue;
                    }
                    let cost = self.placement_cost(
                        &service_id,
                        &demand,
                        &candidate,
                    )?;
                    if cost
                        > self.settings.migration_improvement_ratio
                            * current_cost
                    {
                        continue;
                    }

                    match self.registry.deploy(
                        &service_id,
                        &demand,
                        &candidate,
                    ) {
                        Ok(()) => {
                            let released = self
                                .allocated
                                .get(&service_id)
                                .map(|entry| *entry.value())
                                .unwrap_or_else(|| *service.requirements());
                            self.registry.withdraw(
                                &service_id,
                                &released,
                                &current_node,
                            )?;
                            self.allocated
                                .insert(service_id.clone(), demand);
                            self.placement
                                .assign(service_id.clone(), candidate.clone());
                            debug!(
                                service = %service_id,
                                from = %current_node,
                                to = %candidate,
                                "migrated service"
                            );
                            break;
                        }
                        Err(node_registry::Error::Capacity(_)) => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Distill the latest monitoring snapshot into per-node telemetry for
    /// the federated round.
    async fn collect_telemetry(&self) -> HashMap<NodeId, NodeTelemetry> {
        let snapshot = self.monitor.latest().await;
        let mut telemetry = HashMap::new();

        for node in self.registry.sorted_ids() {
            let average_utilization = self
                .registry
                .with_node(&node, |n| n.capacity().average_utilization())
                .unwrap_or(0.0);

            let mut latencies = Vec::new();
            let mut dispersions = Vec::new();
            let mut completions = Vec::new();
            for (chain_id, metrics) in &snapshot.chains {
                let touches_node = self
                    .monitor
                    .chain_members(chain_id)
                    .map(|members| {
                        members.iter().any(|member| {
                            self.placement.node_of(member).as_ref()
                                == Some(&node)
                        })
                    })
                    .unwrap_or(false);
                if !touches_node {
                    continue;
                }
                latencies.push(metrics.end_to_end_latency_ms);
                dispersions.push(metrics.latency_dispersion);
                if let Some(success_ratio) =
                    self.monitor.chain_success_ratio(chain_id)
                {
                    completions.push(success_ratio);
                }
            }

            let report = NodeTelemetry {
                average_utilization,
                average_chain_latency_ms: mean(&latencies).unwrap_or(0.0),
                chain_latency_variance: mean(&dispersions)
                    .unwrap_or(NodeTelemetry::default().chain_latency_variance),
                completion_rate: mean(&completions),
            };
            telemetry.insert(node, report);
        }

        telemetry
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use model::domain::node::ComputeNode;
    use model::domain::resources::ResourceRequirements;
    use model::domain::service::Microservice;
    use model::domain::sliding_window::WindowSize;
    use uom::si::f64::{Information, Time};

    use super::*;
    use crate::repository::node_probe::SyntheticProbe;
    use crate::service::federation::FederationSettings;
    use crate::service::monitor::SamplingSettings;

    fn service(
        id: &str,
        cpu: f64,
        mem: f64,
        bw: f64,
        exec_ms: f64,
    ) -> Microservice {
        Microservice::new(
            ServiceId::from(id),
            ResourceRequirements::new(cpu, mem, bw),
            Time::new::<millisecond>(exec_ms),
        )
    }

    fn refinement(max_iterations: usize) -> RefinementSettings {
        RefinementSettings {
            max_iterations,
            convergence_threshold: 0.01,
            migration_improvement_ratio: 0.8,
        }
    }

    async fn deployment(
        graph: DependencyGraph,
        registry: NodeRegistry,
        settings: RefinementSettings,
    ) -> DeploymentService {
        let graph = Arc::new(graph);
        let registry = Arc::new(registry);
        let placement = Arc::new(PlacementTable::new());
        let analyzer = Arc::new(CriticalPathAnalyzer::new(
            graph.clone(),
            registry.clone(),
            placement.clone(),
        ));
        let optimizer = Arc::new(FederatedOptimizer::new(
            registry.clone(),
            FederationSettings {
                base_learning_rate: 1e-3,
                adaptivity_factor:  0.5,
                quantity_threshold: 3,
                quality_threshold:  0.7,
                local_blend_ratio:  0.2,
            },
        ));
        for node in registry.sorted_ids() {
            optimizer.register_node(node).await;
        }
        let monitor = Arc::new(Monitor::new(
            graph.clone(),
            registry.clone(),
            placement.clone(),
            Arc::new(SyntheticProbe::new()),
            SamplingSettings {
                base_interval:    Duration::from_secs(1),
                min_interval:     Duration::from_millis(100),
                epsilon_resource: 0.1,
                epsilon_latency:  0.05,
                history_size:     100,
                window_size:      WindowSize::try_new(20).unwrap(),
            },
        ));

        DeploymentService::new(
            graph, registry, placement, analyzer, optimizer, monitor,
            settings,
        )
    }

    fn linear_chain_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_service(service("frontend", 0.8, 800.0, 15.0, 10.0));
        graph.add_service(service("backend", 0.3, 1500.0, 40.0, 15.0));
        graph
            .add_dependency(
                "frontend".into(),
                "backend".into(),
                Information::new::<uom::si::information::megabyte>(50.0),
                0.8,
            )
            .unwrap();
        graph
    }

    fn edge_cloud_registry() -> NodeRegistry {
        let registry = NodeRegistry::new();
        registry.register(ComputeNode::edge(NodeId::from("edge-1")));
        registry.register(ComputeNode::cloud(NodeId::from("cloud-1")));
        registry
            .set_delay(
                &NodeId::from("edge-1"),
                NodeId::from("cloud-1"),
                Time::new::<millisecond>(30.0),
            )
            .unwrap();
        registry
            .set_delay(
                &NodeId::from("cloud-1"),
                NodeId::from("edge-1"),
                Time::new::<millisecond>(30.0),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn linear_chain_colocates_on_the_cloud_node() {
        let deployer = deployment(
            linear_chain_graph(),
            edge_cloud_registry(),
            refinement(10),
        )
        .await;

        let outcome = deployer.execute_deployment().await.unwrap();

        assert!(outcome.unplaced.is_empty());
        assert_eq!(
            outcome.placement.get(&ServiceId::from("frontend")),
            Some(&NodeId::from("cloud-1"))
        );
        assert_eq!(
            outcome.placement.get(&ServiceId::from("backend")),
            Some(&NodeId::from("cloud-1"))
        );

        let chains = deployer.critical_paths().await;
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].0, ChainId::from("frontend-backend"));
        assert_eq!(
            chains[0].1,
            vec![ServiceId::from("frontend"), ServiceId::from("backend")]
        );

        // Reservations carry the criticality-scaled demand: both services
        // sit on a path of criticality 0.5, so each reserved
        // 1 + 0.3 * 0.5 = 1.15 times its base cpu.
        deployer
            .registry
            .with_node(&NodeId::from("cloud-1"), |node| {
                let expected = (0.8 + 0.3) * 1.15 / 16.0;
                assert!(
                    (node.capacity().cpu_utilization() - expected).abs()
                        < 1e-9
                );
            })
            .unwrap();

        // Colocated end-to-end latency: 10 + 15 + 50/1000.
        let latency = deployer
            .graph
            .sequential_latency(&chains[0].1, |a, b| {
                deployer.placement.colocated(a, b)
            })
            .unwrap();
        assert!((latency.get::<millisecond>() - 25.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn capacity_exhaustion_leaves_services_unplaced() {
        let mut graph = DependencyGraph::new();
        for id in ["s1", "s2", "s3"] {
            graph.add_service(service(id, 3.0, 4000.0, 40.0, 10.0));
        }
        let registry = NodeRegistry::new();
        registry.register(ComputeNode::edge(NodeId::from("edge-1")));

        let deployer = deployment(graph, registry, refinement(10)).await;
        let outcome = deployer.execute_deployment().await.unwrap();

        assert_eq!(outcome.placement.len(), 1);
        assert_eq!(outcome.unplaced.len(), 2);
        for (_, reason) in &outcome.unplaced {
            assert_eq!(reason.to_string(), "insufficient capacity");
        }
        // No axis went negative: utilization stays within [0, 1].
        deployer
            .registry
            .with_node(&NodeId::from("edge-1"), |node| {
                let capacity = node.capacity();
                assert!(capacity.cpu_utilization() <= 1.0);
                assert!(capacity.memory_utilization() <= 1.0);
                assert!(capacity.bandwidth_utilization() <= 1.0);
            })
            .unwrap();
    }

    #[tokio::test]
    async fn zero_refinement_rounds_keep_the_residual_placement() {
        let without_refinement = deployment(
            linear_chain_graph(),
            edge_cloud_registry(),
            refinement(0),
        )
        .await;
        let baseline =
            without_refinement.execute_deployment().await.unwrap();
        assert_eq!(baseline.refinement_rounds, 0);
        assert!(!baseline.converged);

        let with_refinement = deployment(
            linear_chain_graph(),
            edge_cloud_registry(),
            refinement(10),
        )
        .await;
        let refined = with_refinement.execute_deployment().await.unwrap();

        assert_eq!(baseline.placement, refined.placement);
    }

    #[tokio::test]
    async fn refinement_migrates_towards_a_placed_consumer() {
        let mut graph = DependencyGraph::new();
        graph.add_service(service("producer", 0.5, 500.0, 10.0, 10.0));
        graph.add_service(service("consumer", 0.5, 500.0, 10.0, 10.0));
        graph
            .add_dependency(
                "producer".into(),
                "consumer".into(),
                Information::new::<uom::si::information::megabyte>(10.0),
                1.0,
            )
            .unwrap();

        let registry = NodeRegistry::new();
        registry.register(ComputeNode::cloud(NodeId::from("n1")));
        registry.register(ComputeNode::cloud(NodeId::from("n2")));

        let deployer = deployment(graph, registry, refinement(10)).await;

        // Start from a deliberately bad split.
        let producer = ServiceId::from("producer");
        let consumer = ServiceId::from("consumer");
        let reqs = ResourceRequirements::new(0.5, 500.0, 10.0);
        deployer
            .registry
            .deploy(&producer, &reqs, &NodeId::from("n1"))
            .unwrap();
        deployer.placement.assign(producer.clone(), NodeId::from("n1"));
        deployer
            .registry
            .deploy(&consumer, &reqs, &NodeId::from("n2"))
            .unwrap();
        deployer.placement.assign(consumer.clone(), NodeId::from("n2"));

        deployer.identify_critical_paths().await.unwrap();
        deployer.refine_placement().await.unwrap();

        // The 100 ms default delay makes the split cost dwarf the
        // colocated cost, so the producer moves in with its consumer.
        assert_eq!(
            deployer.placement.node_of(&producer),
            Some(NodeId::from("n2"))
        );
        assert!(deployer
            .registry
            .with_node(&NodeId::from("n2"), |n| n.hosts(&producer))
            .unwrap());
        assert!(!deployer
            .registry
            .with_node(&NodeId::from("n1"), |n| n.hosts(&producer))
            .unwrap());
    }

    #[tokio::test]
    async fn symmetric_candidates_do_not_trigger_migration() {
        let mut graph = DependencyGraph::new();
        graph.add_service(service("solo", 0.5, 500.0, 10.0, 10.0));

        let registry = NodeRegistry::new();
        registry.register(ComputeNode::cloud(NodeId::from("n1")));
        registry.register(ComputeNode::cloud(NodeId::from("n2")));

        let deployer = deployment(graph, registry, refinement(10)).await;
        let solo = ServiceId::from("solo");
        let reqs = ResourceRequirements::new(0.5, 500.0, 10.0);
        deployer
            .registry
            .deploy(&solo, &reqs, &NodeId::from("n1"))
            .unwrap();
        deployer.placement.assign(solo.clone(), NodeId::from("n1"));

        deployer.identify_critical_paths().await.unwrap();
        deployer.refine_placement().await.unwrap();

        // An identical empty twin is no 20% improvement.
        assert_eq!(
            deployer.placement.node_of(&solo),
            Some(NodeId::from("n1"))
        );
    }

    #[tokio::test]
    async fn ties_resolve_to_the_smallest_node_id() {
        let mut graph = DependencyGraph::new();
        graph.add_service(service("svc", 0.5, 500.0, 10.0, 10.0));

        let registry = NodeRegistry::new();
        registry.register(ComputeNode::edge(NodeId::from("edge-b")));
        registry.register(ComputeNode::edge(NodeId::from("edge-a")));

        let deployer = deployment(graph, registry, refinement(0)).await;
        let outcome = deployer.execute_deployment().await.unwrap();

        assert_eq!(
            outcome.placement.get(&ServiceId::from("svc")),
            Some(&NodeId::from("edge-a"))
        );
    }

    #[tokio::test]
    async fn placement_cost_matches_the_documented_mix() {
        let deployer = deployment(
            linear_chain_graph(),
            edge_cloud_registry(),
            refinement(0),
        )
        .await;

        // Place the consumer on the edge, then cost the producer on the
        // cloud: one remote incident edge at 30 ms, 50 MB, 0.8 Hz.
        let backend = ServiceId::from("backend");
        let reqs = ResourceRequirements::new(0.3, 1500.0, 40.0);
        deployer
            .registry
            .deploy(&backend, &reqs, &NodeId::from("edge-1"))
            .unwrap();
        deployer.placement.assign(backend, NodeId::from("edge-1"));

        let cost = deployer
            .placement_cost(
                &ServiceId::from("frontend"),
                &ResourceRequirements::new(0.8, 800.0, 15.0),
                &NodeId::from("cloud-1"),
            )
            .unwrap();

        let communication = 30.0 * 50.0 * 0.8;
        let resource =
            (0.8 / 16.0) * (800.0 / 32000.0) * (15.0 / 1000.0);
        let expected = 0.5 * communication + 0.3 * resource + 0.2 * 0.0;
        assert!((cost - expected).abs() < 1e-9);
    }
}
