use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use model::domain::parameters::ParameterVector;
use model::domain::resources::ResourceRequirements;
use model::NodeId;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::repository::node_registry::NodeRegistry;

/// Fail-rate smoothing keeps 90% of the prior estimate.
const FAIL_RATE_RETENTION: f64 = 0.9;
const INITIAL_FAIL_RATE: f64 = 0.05;
const INITIAL_QUALITY_SCORE: f64 = 0.8;
/// Quality smoothing takes 30% from the latest completion rate.
const QUALITY_BLEND: f64 = 0.3;
/// Capability assumed for nodes missing from the registry.
const UNKNOWN_NODE_CAPABILITY: f64 = 0.5;
/// Default completion rate assumed by the threshold gradient when no
/// completions have been reported yet.
const ASSUMED_COMPLETION_RATE: f64 = 0.9;

/// What one federated round knows about a node, distilled from the
/// monitoring snapshot.
#[derive(Debug, Clone)]
pub struct NodeTelemetry {
    /// Mean utilization across the node's three resource axes.
    pub average_utilization:      f64,
    /// Mean end-to-end latency of the chains touching this node, ms.
    pub average_chain_latency_ms: f64,
    /// Dispersion of those chain latencies; dampens the learning rate.
    pub chain_latency_variance:   f64,
    /// Observed chain completion rate, when any executions were reported.
    pub completion_rate:          Option<f64>,
}

impl Default for NodeTelemetry {
    fn default() -> Self {
        Self {
            average_utilization:      0.0,
            average_chain_latency_ms: 0.0,
            chain_latency_variance:   1.0,
            completion_rate:          None,
        }
    }
}

/// A node's local view of the shared parameters: the mirror it adapts
/// with gradient steps, how many rounds fed it, and how trustworthy its
/// proposals have proven.
#[derive(Debug, Clone)]
struct NodeModel {
    parameters:   ParameterVector,
    sample_count: u64,
    quality:      f64,
}

/// Request-outcome bookkeeping behind the fail-rate EMA.
#[derive(Debug, Clone)]
struct NodeStats {
    fail_rate: f64,
    failed:    u64,
    total:     u64,
}

impl Default for NodeStats {
    fn default() -> Self {
        Self { fail_rate: INITIAL_FAIL_RATE, failed: 0, total: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct FederationSettings {
    pub base_learning_rate: f64,
    pub adaptivity_factor:  f64,
    pub quantity_threshold: u64,
    pub quality_threshold:  f64,
    pub local_blend_ratio:  f64,
}

/// Closes the adaptation loop: per-node gradient steps on local parameter
/// mirrors, quality-gated weighted aggregation into the global vector,
/// and redistribution of the blend back to the mirrors.
#[derive(Debug)]
pub struct FederatedOptimizer {
    registry: Arc<NodeRegistry>,
    settings: FederationSettings,
    global:   RwLock<ParameterVector>,
    models:   DashMap<NodeId, NodeModel>,
    stats:    DashMap<NodeId, NodeStats>,
}

impl FederatedOptimizer {
    pub fn new(
        registry: Arc<NodeRegistry>,
        settings: FederationSettings,
    ) -> Self {
        Self {
            registry,
            settings,
            global: RwLock::new(ParameterVector::default()),
            models: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Enroll a node. Its mirror starts as a copy of the current global
    /// vector.
    pub async fn register_node(&self, node: NodeId) {
        let global = *self.global.read().await;
        self.models.insert(
            node.clone(),
            NodeModel {
                parameters:   global,
                sample_count: 0,
                quality:      INITIAL_QUALITY_SCORE,
            },
        );
        self.stats.entry(node).or_default();
    }

    pub async fn global_parameters(&self) -> ParameterVector {
        *self.global.read().await
    }

    /// One full round: local gradient steps, aggregation, distribution.
    /// Returns the L2 norm of the global parameter change.
    pub async fn execute_round(
        &self,
        telemetry: &HashMap<NodeId, NodeTelemetry>,
    ) -> f64 {
        self.local_round(telemetry);
        let delta = self.aggregate().await;
        self.distribute().await;
        delta
    }

    /// Gradient-step every node that reported telemetry this round.
    pub fn local_round(&self, telemetry: &HashMap<NodeId, NodeTelemetry>) {
        for mut entry in self.models.iter_mut() {
            let Some(report) = telemetry.get(entry.key()) else {
                continue;
            };
            let learning_rate = self.learning_rate(report);
            let model = entry.value_mut();

            let params = &mut model.parameters;
            params.temporal_weight -=
                learning_rate * (report.average_chain_latency_ms / 100.0);
            params.resource_weight -= learning_rate
                * ((report.average_utilization - 0.7) * 0.5);
            params.dependency_weight -= learning_rate * 0.1;

            let completion = report
                .completion_rate
                .unwrap_or(ASSUMED_COMPLETION_RATE);
            params.critical_path_threshold -=
                learning_rate * ((0.95 - completion) * 0.2);
            params.resource_scaling_factor -= learning_rate
                * ((0.7 - report.average_utilization) * 0.3);

            params.renormalize_criticality_weights();

            model.sample_count += 1;
            if let Some(completion) = report.completion_rate {
                model.quality = (1.0 - QUALITY_BLEND) * model.quality
                    + QUALITY_BLEND * completion;
            }
        }
    }

    /// Variance-damped learning rate, never above the base rate.
    fn learning_rate(&self, report: &NodeTelemetry) -> f64 {
        let base = self.settings.base_learning_rate;
        base.min(
            base / (1.0
                + self.settings.adaptivity_factor
                    * report.chain_latency_variance)
                .sqrt(),
        )
    }

    /// Fold the qualified mirrors into a new global vector. Nodes must
    /// have both enough samples and a good enough quality score to vote;
    /// an empty electorate leaves the vector untouched. Returns the L2
    /// delta of the global vector.
    pub async fn aggregate(&self) -> f64 {
        let selected: Vec<(NodeId, NodeModel)> = self
            .models
            .iter()
            .filter(|entry| {
                entry.value().sample_count
                    >= self.settings.quantity_threshold
                    && entry.value().quality
                        >= self.settings.quality_threshold
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if selected.is_empty() {
            trace!("no node qualifies for aggregation, keeping the global vector");
            return 0.0;
        }

        let mut global = self.global.write().await;
        let previous = *global;

        let weights: Vec<f64> = selected
            .iter()
            .map(|(node, model)| {
                let capability = self
                    .registry
                    .capability(node)
                    .unwrap_or(UNKNOWN_NODE_CAPABILITY);
                let stability = 1.0 - self.fail_rate(node);
                capability * stability * (model.sample_count as f64).sqrt()
            })
            .collect();

        let mut aggregated = previous;
        for (name, current) in previous.entries() {
            let mut weighted_sum = 0.0;
            let mut weight_sum = 0.0;
            for ((_, model), weight) in selected.iter().zip(&weights) {
                if let Some(value) = model.parameters.get(name) {
                    weighted_sum += value * weight;
                    weight_sum += weight;
                }
            }
            let value = if weight_sum > 0.0 {
                weighted_sum / weight_sum
            } else {
                current
            };
            aggregated.set(name, value);
        }
        aggregated.renormalize_criticality_weights();

        *global = aggregated;
        let delta = aggregated.delta_l2(&previous);
        debug!(
            voters = selected.len(),
            delta, "aggregated federated parameters"
        );
        delta
    }

    /// Push the global vector back down, preserving a slice of each
    /// node's own adaptation.
    pub async fn distribute(&self) {
        let global = *self.global.read().await;
        for mut entry in self.models.iter_mut() {
            let model = entry.value_mut();
            model.parameters = ParameterVector::blended(
                &global,
                &model.parameters,
                self.settings.local_blend_ratio,
            );
        }
    }

    /// Record a request outcome against the node and refresh its
    /// fail-rate EMA.
    pub fn record_request_outcome(&self, node: &NodeId, succeeded: bool) {
        let mut stats = self.stats.entry(node.clone()).or_default();
        stats.total += 1;
        if !succeeded {
            stats.failed += 1;
        }
        stats.fail_rate = FAIL_RATE_RETENTION * stats.fail_rate
            + (1.0 - FAIL_RATE_RETENTION)
                * (stats.failed as f64 / stats.total as f64);
    }

    pub fn fail_rate(&self, node: &NodeId) -> f64 {
        self.stats
            .get(node)
            .map(|entry| entry.fail_rate)
            .unwrap_or(INITIAL_FAIL_RATE)
    }

    pub fn sample_count(&self, node: &NodeId) -> u64 {
        self.models
            .get(node)
            .map(|entry| entry.sample_count)
            .unwrap_or(0)
    }

    pub fn quality_score(&self, node: &NodeId) -> f64 {
        self.models
            .get(node)
            .map(|entry| entry.quality)
            .unwrap_or(INITIAL_QUALITY_SCORE)
    }

    pub fn local_parameters(&self, node: &NodeId) -> Option<ParameterVector> {
        self.models.get(node).map(|entry| entry.parameters)
    }

    /// Demand inflated in proportion to how critical the service's path
    /// is, steered by the learned scaling factor.
    pub async fn scaled_allocation(
        &self,
        requirements: &ResourceRequirements,
        path_criticality: f64,
    ) -> ResourceRequirements {
        let scaling =
            self.global.read().await.resource_scaling_factor;
        requirements.scale(1.0 + scaling * path_criticality)
    }
}

#[cfg(test)]
mod tests {
    use model::domain::node::ComputeNode;

    use super::*;

    fn settings() -> FederationSettings {
        FederationSettings {
            base_learning_rate: 1e-3,
            adaptivity_factor:  0.5,
            quantity_threshold: 3,
            quality_threshold:  0.7,
            local_blend_ratio:  0.2,
        }
    }

    fn optimizer_with_nodes(ids: &[&str]) -> FederatedOptimizer {
        let registry = NodeRegistry::new();
        for id in ids {
            registry.register(ComputeNode::cloud(NodeId::from(*id)));
        }
        FederatedOptimizer::new(Arc::new(registry), settings())
    }

    fn telemetry_for(
        ids: &[&str],
        report: NodeTelemetry,
    ) -> HashMap<NodeId, NodeTelemetry> {
        ids.iter()
            .map(|id| (NodeId::from(*id), report.clone()))
            .collect()
    }

    #[tokio::test]
    async fn learning_rate_is_damped_by_variance() {
        let optimizer = optimizer_with_nodes(&["n1"]);

        let calm = NodeTelemetry {
            chain_latency_variance: 0.0,
            ..NodeTelemetry::default()
        };
        let noisy = NodeTelemetry {
            chain_latency_variance: 8.0,
            ..NodeTelemetry::default()
        };

        assert!((optimizer.learning_rate(&calm) - 1e-3).abs() < 1e-12);
        // sqrt(1 + 0.5 * 8) = sqrt(5)
        assert!(
            (optimizer.learning_rate(&noisy) - 1e-3 / 5f64.sqrt()).abs()
                < 1e-12
        );
    }

    #[tokio::test]
    async fn local_round_only_touches_reporting_nodes() {
        let optimizer = optimizer_with_nodes(&["n1", "n2"]);
        optimizer.register_node(NodeId::from("n1")).await;
        optimizer.register_node(NodeId::from("n2")).await;

        optimizer
            .local_round(&telemetry_for(&["n1"], NodeTelemetry::default()));

        assert_eq!(optimizer.sample_count(&NodeId::from("n1")), 1);
        assert_eq!(optimizer.sample_count(&NodeId::from("n2")), 0);
    }

    #[tokio::test]
    async fn gradients_move_the_mirror_in_the_expected_direction() {
        let optimizer = optimizer_with_nodes(&["n1"]);
        optimizer.register_node(NodeId::from("n1")).await;

        let report = NodeTelemetry {
            average_utilization:      0.9,
            average_chain_latency_ms: 200.0,
            chain_latency_variance:   0.0,
            completion_rate:          Some(0.5),
        };
        optimizer.local_round(&telemetry_for(&["n1"], report));

        let local =
            optimizer.local_parameters(&NodeId::from("n1")).unwrap();
        let defaults = ParameterVector::default();
        // High latency pushes the temporal weight down (before the
        // renormalization spreads the mass), a poor completion rate
        // lowers the threshold, a hot node lifts the scaling factor.
        assert!(local.critical_path_threshold < defaults.critical_path_threshold);
        assert!(local.resource_scaling_factor > defaults.resource_scaling_factor);
        let (alpha, beta, gamma) = local.criticality_weights();
        assert!((alpha + beta + gamma - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn aggregation_gates_on_sample_count() {
        let optimizer = optimizer_with_nodes(&["n1", "n2"]);
        optimizer.register_node(NodeId::from("n1")).await;
        optimizer.register_node(NodeId::from("n2")).await;

        // n1 reports twice, n2 five times with a skewed utilization so
        // its mirror drifts away from the defaults.
        let hot = NodeTelemetry {
            average_utilization: 1.0,
            ..NodeTelemetry::default()
        };
        for round in 0..5 {
            let mut telemetry = telemetry_for(&["n2"], hot.clone());
            if round < 2 {
                telemetry.insert(
                    NodeId::from("n1"),
                    NodeTelemetry::default(),
                );
            }
            optimizer.local_round(&telemetry);
        }

        let n2_local =
            optimizer.local_parameters(&NodeId::from("n2")).unwrap();
        let before = optimizer.global_parameters().await;
        let delta = optimizer.aggregate().await;
        let after = optimizer.global_parameters().await;

        assert!(delta > 0.0);
        // Only n2 qualified, so the global vector lands on its proposal.
        assert!(
            (after.resource_scaling_factor
                - n2_local.resource_scaling_factor)
                .abs()
                < 1e-9
        );
        assert!(
            (after.resource_scaling_factor
                - before.resource_scaling_factor)
                .abs()
                > 0.0
        );
    }

    #[tokio::test]
    async fn empty_electorate_keeps_the_global_vector() {
        let optimizer = optimizer_with_nodes(&["n1"]);
        optimizer.register_node(NodeId::from("n1")).await;

        let before = optimizer.global_parameters().await;
        let delta = optimizer.aggregate().await;
        let after = optimizer.global_parameters().await;

        assert_eq!(delta, 0.0);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn distribution_blends_towards_the_global_vector() {
        let optimizer = optimizer_with_nodes(&["n1"]);
        optimizer.register_node(NodeId::from("n1")).await;

        // Drift the mirror, then distribute the unchanged global.
        let hot = NodeTelemetry {
            average_utilization: 1.0,
            ..NodeTelemetry::default()
        };
        for _ in 0..3 {
            optimizer.local_round(&telemetry_for(&["n1"], hot.clone()));
        }
        let drifted =
            optimizer.local_parameters(&NodeId::from("n1")).unwrap();
        optimizer.distribute().await;
        let blended =
            optimizer.local_parameters(&NodeId::from("n1")).unwrap();
        let global = optimizer.global_parameters().await;

        let expected = 0.8 * global.resource_scaling_factor
            + 0.2 * drifted.resource_scaling_factor;
        assert!(
            (blended.resource_scaling_factor - expected).abs() < 1e-9
        );
    }

    #[tokio::test]
    async fn fail_rate_is_smoothed() {
        let optimizer = optimizer_with_nodes(&["n1"]);
        let node = NodeId::from("n1");

        optimizer.record_request_outcome(&node, false);
        // 0.9 * 0.05 + 0.1 * 1.0
        assert!((optimizer.fail_rate(&node) - 0.145).abs() < 1e-9);

        optimizer.record_request_outcome(&node, true);
        // 0.9 * 0.145 + 0.1 * 0.5
        assert!((optimizer.fail_rate(&node) - 0.1805).abs() < 1e-9);
    }

    #[tokio::test]
    async fn quality_tracks_reported_completions() {
        let optimizer = optimizer_with_nodes(&["n1"]);
        optimizer.register_node(NodeId::from("n1")).await;

        let report = NodeTelemetry {
            completion_rate: Some(0.4),
            ..NodeTelemetry::default()
        };
        optimizer.local_round(&telemetry_for(&["n1"], report));

        // 0.7 * 0.8 + 0.3 * 0.4
        assert!(
            (optimizer.quality_score(&NodeId::from("n1")) - 0.68).abs()
                < 1e-9
        );
    }

    #[tokio::test]
    async fn scaled_allocation_grows_with_criticality() {
        let optimizer = optimizer_with_nodes(&["n1"]);
        let base = ResourceRequirements::new(1.0, 1000.0, 10.0);

        let scaled = optimizer.scaled_allocation(&base, 0.9).await;
        // Default scaling factor 0.3: 1 + 0.3 * 0.9 = 1.27
        assert!((scaled.cpu.value / base.cpu.value - 1.27).abs() < 1e-9);
    }
}
