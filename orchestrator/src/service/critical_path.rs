use std::sync::Arc;

use model::domain::parameters::ParameterVector;
use model::ServiceId;
use tokio::sync::RwLock;
use uom::si::ratio::ratio;
use uom::si::time::millisecond;

use crate::repository::dependency_graph::{self, DependencyGraph};
use crate::repository::node_registry::NodeRegistry;
use crate::repository::placement::PlacementTable;

/// Below this spread the weight proposals are considered flat and the
/// defaults are restored.
const WEIGHT_STDEV_GUARD: f64 = 1e-3;
const WEIGHT_SUM_GUARD: f64 = 1e-6;

/// Resource pressure mixes the three axes with the typical bottleneck
/// bias.
const PRESSURE_CPU_WEIGHT: f64 = 0.5;
const PRESSURE_MEMORY_WEIGHT: f64 = 0.3;
const PRESSURE_BANDWIDTH_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct ScoringWeights {
    alpha:     f64,
    beta:      f64,
    gamma:     f64,
    threshold: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        let defaults = ParameterVector::default();
        Self {
            alpha:     defaults.temporal_weight,
            beta:      defaults.resource_weight,
            gamma:     defaults.dependency_weight,
            threshold: defaults.critical_path_threshold,
        }
    }
}

/// A scored source→sink walk. `critical` marks scores that crossed the
/// configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PathCriticality {
    pub services: Vec<ServiceId>,
    pub score:    f64,
    pub critical: bool,
}

/// Ranks chain paths along three normalized dimensions: how long the walk
/// takes, how much pressure its services put on their hosts, and how
/// heavy the fan-out of its members is.
#[derive(Debug)]
pub struct CriticalPathAnalyzer {
    graph:     Arc<DependencyGraph>,
    registry:  Arc<NodeRegistry>,
    placement: Arc<PlacementTable>,
    weights:   RwLock<ScoringWeights>,
}

impl CriticalPathAnalyzer {
    pub fn new(
        graph: Arc<DependencyGraph>,
        registry: Arc<NodeRegistry>,
        placement: Arc<PlacementTable>,
    ) -> Self {
        Self {
            graph,
            registry,
            placement,
            weights: RwLock::new(ScoringWeights::default()),
        }
    }

    /// Replace the criticality weights. Proposals with no meaningful
    /// spread, and proposals whose clamped sum vanishes, snap back to the
    /// defaults; anything else is renormalized so α + β + γ = 1.
    pub async fn update_weights(&self, alpha: f64, beta: f64, gamma: f64) {
        let mean = (alpha + beta + gamma) / 3.0;
        let stdev = (((alpha - mean).powi(2)
            + (beta - mean).powi(2)
            + (gamma - mean).powi(2))
            / 3.0)
            .sqrt();

        let mut weights = self.weights.write().await;
        if stdev <= WEIGHT_STDEV_GUARD {
            let defaults = ScoringWeights::default();
            weights.alpha = defaults.alpha;
            weights.beta = defaults.beta;
            weights.gamma = defaults.gamma;
            return;
        }

        let alpha = alpha.max(0.0);
        let beta = beta.max(0.0);
        let gamma = gamma.max(0.0);
        let sum = alpha + beta + gamma;
        if sum <= WEIGHT_SUM_GUARD {
            let defaults = ScoringWeights::default();
            weights.alpha = defaults.alpha;
            weights.beta = defaults.beta;
            weights.gamma = defaults.gamma;
            return;
        }

        weights.alpha = alpha / sum;
        weights.beta = beta / sum;
        weights.gamma = gamma / sum;
    }

    /// Replace the criticality threshold, unclamped.
    pub async fn set_threshold(&self, threshold: f64) {
        self.weights.write().await.threshold = threshold;
    }

    pub async fn weights(&self) -> (f64, f64, f64) {
        let weights = self.weights.read().await;
        (weights.alpha, weights.beta, weights.gamma)
    }

    pub async fn threshold(&self) -> f64 {
        self.weights.read().await.threshold
    }

    /// Score and order every simple path from `source` to `sink`:
    /// descending score, shorter paths first on ties, then the
    /// lexicographic id sequence.
    pub async fn rank_paths(
        &self,
        source: &ServiceId,
        sink: &ServiceId,
    ) -> Result<Vec<PathCriticality>, dependency_graph::Error> {
        let paths = self.graph.all_paths(source, sink)?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut temporal = Vec::with_capacity(paths.len());
        let mut resource = Vec::with_capacity(paths.len());
        let mut dependency = Vec::with_capacity(paths.len());
        for path in &paths {
            temporal.push(self.temporal_criticality(path)?);
            resource.push(self.resource_criticality(path));
            dependency.push(self.dependency_criticality(path));
        }

        let temporal_bounds = bounds(&temporal);
        let resource_bounds = bounds(&resource);
        let dependency_bounds = bounds(&dependency);

        let weights = *self.weights.read().await;
        let mut ranked: Vec<PathCriticality> = paths
            .into_iter()
            .enumerate()
            .map(|(i, services)| {
                let score = weights.alpha
                    * normalize(temporal[i], temporal_bounds)
                    + weights.beta * normalize(resource[i], resource_bounds)
                    + weights.gamma
                        * normalize(dependency[i], dependency_bounds);
                PathCriticality {
                    services,
                    score,
                    critical: score > weights.threshold,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.services.len().cmp(&b.services.len()))
                .then_with(|| a.services.cmp(&b.services))
        });

        Ok(ranked)
    }

    /// T(p): the sequential end-to-end latency under the current
    /// placement, in milliseconds.
    fn temporal_criticality(
        &self,
        path: &[ServiceId],
    ) -> Result<f64, dependency_graph::Error> {
        let placement = &self.placement;
        let latency = self.graph.sequential_latency(path, |a, b| {
            placement.colocated(a, b)
        })?;
        Ok(latency.get::<millisecond>())
    }

    /// R(p): per placed service, its pressure on the host scaled by the
    /// host's CPU utilization. Unplaced services contribute nothing.
    fn resource_criticality(&self, path: &[ServiceId]) -> f64 {
        let mut criticality = 0.0;

        for service_id in path {
            let Some(service) = self.graph.service(service_id) else {
                continue;
            };
            let Some(node_id) = self.placement.node_of(service_id) else {
                continue;
            };

            let contribution = self.registry.with_node(&node_id, |node| {
                let reqs = service.requirements();
                let capacity = node.capacity();
                let pressure = PRESSURE_CPU_WEIGHT
                    * (reqs.cpu / capacity.total_cpu()).get::<ratio>()
                    + PRESSURE_MEMORY_WEIGHT
                        * (reqs.memory / capacity.total_memory())
                            .get::<ratio>()
                    + PRESSURE_BANDWIDTH_WEIGHT
                        * (reqs.bandwidth / capacity.total_bandwidth())
                            .get::<ratio>();
                pressure * capacity.cpu_utilization()
            });
            criticality += contribution.unwrap_or(0.0);
        }

        criticality
    }

    /// D(p): fan-out count times the mean traffic impact of the fan-out,
    /// summed over the path. Leaves contribute nothing.
    fn dependency_criticality(&self, path: &[ServiceId]) -> f64 {
        let mut criticality = 0.0;

        for service_id in path {
            let dependencies = self.graph.dependencies_of(service_id);
            if dependencies.is_empty() {
                continue;
            }

            let total_impact: f64 = dependencies
                .iter()
                .map(|edge| {
                    edge.frequency
                        * edge
                            .data_volume
                            .get::<uom::si::information::megabyte>()
                })
                .sum();
            let impact_factor = total_impact / dependencies.len() as f64;

            criticality += dependencies.len() as f64 * impact_factor;
        }

        criticality
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(min, max), &v| (min.min(v), max.max(v)),
    )
}

/// Min–max into [0, 1]; a flat dimension maps to 0.5.
fn normalize(value: f64, (min, max): (f64, f64)) -> f64 {
    if max == min {
        return 0.5;
    }
    (value - min) / (max - min)
}
