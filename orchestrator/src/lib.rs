//! Orchestration core for microservice chains on a cloud-edge fleet:
//! dependency-aware placement, multi-dimensional critical-path analysis,
//! adaptive monitoring, and federated parameter adaptation, sharing one
//! placement table and one parameter vector.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use model::domain::parameters::ParameterVector;
use model::domain::sliding_window::WindowSize;
use model::dto::metrics::MonitoringData;
use model::{ChainId, NodeId, ServiceId};
use tracing::info;

pub mod config;
pub mod repository;
pub mod service;

use crate::config::OrchestrationConfig;
use crate::repository::dependency_graph::DependencyGraph;
use crate::repository::node_probe::NodeProbe;
use crate::repository::node_registry::NodeRegistry;
use crate::repository::placement::PlacementTable;
use crate::service::critical_path::CriticalPathAnalyzer;
use crate::service::deployment::{
    self, DeploymentOutcome, DeploymentService, RefinementSettings,
};
use crate::service::federation::{FederatedOptimizer, FederationSettings};
use crate::service::monitor::{Monitor, SamplingSettings};

/// Composition root and the surface consumed by the chain scheduler.
pub struct Orchestrator {
    graph:     Arc<DependencyGraph>,
    registry:  Arc<NodeRegistry>,
    placement: Arc<PlacementTable>,
    optimizer: Arc<FederatedOptimizer>,
    monitor:   Arc<Monitor>,
    deployer:  DeploymentService,
    config:    OrchestrationConfig,
}

impl Orchestrator {
    pub async fn new(
        graph: DependencyGraph,
        registry: NodeRegistry,
        probe: Arc<dyn NodeProbe>,
        config: OrchestrationConfig,
    ) -> anyhow::Result<Self> {
        let window_size = WindowSize::try_new(config.window_size)
            .context("window size must be at least 2")?;

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
                base_learning_rate: config.base_learning_rate,
                adaptivity_factor:  config.adaptivity_factor,
                quantity_threshold: config.quantity_threshold,
                quality_threshold:  config.quality_threshold,
                local_blend_ratio:  config.local_blend_ratio,
            },
        ));
        for node in registry.sorted_ids() {
            optimizer.register_node(node).await;
        }

        let monitor = Arc::new(Monitor::new(
            graph.clone(),
            registry.clone(),
            placement.clone(),
            probe,
            SamplingSettings {
                base_interval: config.base_sampling_interval,
                min_interval: config.min_sampling_interval,
                epsilon_resource: config.epsilon_resource,
                epsilon_latency: config.epsilon_latency,
                history_size: config.history_size,
                window_size,
            },
        ));
        let deployer = DeploymentService::new(
            graph.clone(),
            registry.clone(),
            placement.clone(),
            analyzer,
            optimizer.clone(),
            monitor.clone(),
            RefinementSettings {
                max_iterations: config.max_refinement_iterations,
                convergence_threshold: config.convergence_threshold,
                migration_improvement_ratio: config
                    .migration_improvement_ratio,
            },
        );

        info!(
            services = graph.len(),
            nodes = registry.len(),
            "orchestration core assembled"
        );

        Ok(Self {
            graph,
            registry,
            placement,
            optimizer,
            monitor,
            deployer,
            config,
        })
    }

    /// Place every service and register the resulting chains with the
    /// monitor.
    pub async fn deploy(
        &self,
    ) -> Result<DeploymentOutcome, deployment::Error> {
        let outcome = self.deployer.execute_deployment().await?;
        for (chain, members) in self.deployer.critical_paths().await {
            self.monitor.register_chain(chain, members).await;
        }
        Ok(outcome)
    }

    /// Current service → node assignment.
    pub fn placement(&self) -> HashMap<ServiceId, NodeId> {
        self.placement.as_map()
    }

    /// The kept path per chain, keyed `"{source}-{sink}"`.
    pub async fn critical_paths(&self) -> HashMap<ChainId, Vec<ServiceId>> {
        self.deployer.critical_paths().await.into_iter().collect()
    }

    /// Latest aggregated monitoring snapshot.
    pub async fn latest_metrics(&self) -> Arc<MonitoringData> {
        self.monitor.latest().await
    }

    /// Feed one observed chain execution back into the loop: chain
    /// statistics for the monitor, request outcomes for the fail-rate
    /// EMA of every node hosting a member.
    pub async fn report_completion(
        &self,
        chain: &ChainId,
        latency_ms: f64,
        succeeded: bool,
    ) {
        self.monitor.record_chain_completion(chain, latency_ms, succeeded);

        let Some(members) = self.monitor.chain_members(chain) else {
            return;
        };
        let mut seen = HashSet::new();
        for member in members {
            if let Some(node) = self.placement.node_of(&member) {
                if seen.insert(node.clone()) {
                    self.optimizer.record_request_outcome(&node, succeeded);
                }
            }
        }
    }

    /// Pearson correlation of two services' utilization patterns.
    pub fn interference(&self, a: &ServiceId, b: &ServiceId) -> f64 {
        self.monitor.interference(a, b)
    }

    /// Nodes with any resource axis above the configured threshold.
    pub fn overloaded_nodes(&self) -> Vec<NodeId> {
        let mut overloaded = Vec::new();
        self.registry.for_each(|node| {
            if node.is_overloaded(self.config.utilization_threshold) {
                overloaded.push(node.id().clone());
            }
        });
        overloaded
    }

    pub async fn global_parameters(&self) -> ParameterVector {
        self.optimizer.global_parameters().await
    }

    pub async fn start_monitoring(&self) { self.monitor.start().await }

    pub async fn stop_monitoring(&self) -> anyhow::Result<()> {
        self.monitor.stop().await
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> { &self.graph }

    pub fn monitor(&self) -> &Arc<Monitor> { &self.monitor }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use model::domain::node::ComputeNode;
    use model::domain::resources::ResourceRequirements;
    use model::domain::service::Microservice;
    use uom::si::f64::{Information, Time};
    use uom::si::information::megabyte;
    use uom::si::time::millisecond;

    use super::*;
    use crate::repository::node_probe::SyntheticProbe;

    async fn orchestrator() -> Orchestrator {
        let mut graph = DependencyGraph::new();
        graph.add_service(Microservice::new(
            ServiceId::from("frontend"),
            ResourceRequirements::new(0.8, 800.0, 15.0),
            Time::new::<millisecond>(10.0),
        ));
        graph.add_service(Microservice::new(
            ServiceId::from("backend"),
            ResourceRequirements::new(0.3, 1500.0, 40.0),
            Time::new::<millisecond>(15.0),
        ));
        graph
            .add_dependency(
                "frontend".into(),
                "backend".into(),
                Information::new::<megabyte>(50.0),
                0.8,
            )
            .unwrap();

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

        Orchestrator::new(
            graph,
            registry,
            Arc::new(SyntheticProbe::new()),
            OrchestrationConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_monitor_report_loop() {
        let core = orchestrator().await;

        let outcome = core.deploy().await.unwrap();
        assert!(outcome.unplaced.is_empty());

        let chains = core.critical_paths().await;
        let chain = ChainId::from("frontend-backend");
        assert_eq!(
            chains.get(&chain),
            Some(&vec![
                ServiceId::from("frontend"),
                ServiceId::from("backend")
            ])
        );

        core.start_monitoring().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let snapshot = core.latest_metrics().await;
        assert!(snapshot.chains.contains_key(&chain));
        assert!(snapshot
            .services
            .contains_key(&ServiceId::from("frontend")));

        core.report_completion(&chain, 120.0, true).await;
        core.report_completion(&chain, 480.0, false).await;
        assert!(
            (core.monitor().chain_success_ratio(&chain).unwrap() - 0.5)
                .abs()
                < 1e-9
        );
        // Both reports were charged to the hosting node's fail-rate EMA:
        // 0.9 * (0.9 * 0.05) + 0.1 * 0.5.
        let host = core
            .placement()
            .get(&ServiceId::from("frontend"))
            .cloned()
            .unwrap();
        assert!((core.optimizer.fail_rate(&host) - 0.0905).abs() < 1e-9);

        core.stop_monitoring().await.unwrap();
    }

    #[tokio::test]
    async fn overloaded_nodes_respect_the_threshold() {
        let core = orchestrator().await;
        assert!(core.overloaded_nodes().is_empty());

        core.registry
            .deploy(
                &ServiceId::from("hog"),
                &ResourceRequirements::new(3.8, 1000.0, 10.0),
                &NodeId::from("edge-1"),
            )
            .unwrap();
        assert_eq!(core.overloaded_nodes(), vec![NodeId::from("edge-1")]);
    }
}
