use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use dashmap::DashMap;
use model::domain::sliding_window::{SlidingWindow, WindowSize};
use model::dto::metrics::{
    ChainMetrics, MonitoringData, NodeMetrics, ServiceMetrics,
};
use model::{ChainId, NodeId, ServiceId};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, trace, warn};
use uom::si::time::millisecond;

use crate::repository::dependency_graph::DependencyGraph;
use crate::repository::node_probe::NodeProbe;
use crate::repository::node_registry::NodeRegistry;
use crate::repository::placement::PlacementTable;

/// Variance floor of the interval formula.
const VARIANCE_FLOOR: f64 = 1e-3;
/// Hop latency between colocated chain members.
const LOCAL_HOP_MS: f64 = 1.0;
/// Hop latency assumed when the producing node is unknown.
const UNKNOWN_HOP_MS: f64 = 30.0;
/// The aggregator snapshots at this fixed cadence.
const AGGREGATION_PERIOD: Duration = Duration::from_secs(1);
/// Budget for joining all background tasks on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Seed variance before an entity produced a window.
const INITIAL_VARIANCE: f64 = 0.1;

/// Anything the monitor samples on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MonitoredEntity {
    Service(ServiceId),
    Node(NodeId),
    Chain(ChainId),
}

impl MonitoredEntity {
    /// Latency objective the sampling interval is clamped against.
    fn sla_latency_ms(&self) -> f64 {
        match self {
            MonitoredEntity::Service(_) => 100.0,
            MonitoredEntity::Chain(_) => 500.0,
            MonitoredEntity::Node(_) => 1000.0,
        }
    }
}

impl fmt::Display for MonitoredEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoredEntity::Service(id) => write!(f, "{id}"),
            MonitoredEntity::Node(id) => write!(f, "node_{id}"),
            MonitoredEntity::Chain(id) => write!(f, "chain_{id}"),
        }
    }
}

#[derive(Debug)]
struct ServiceState {
    cpu_utilization:       f64,
    memory_utilization:    f64,
    bandwidth_utilization: f64,
    processing_latency_ms: f64,
    queue_length:          f64,
    request_rate:          f64,
    latency_window:        SlidingWindow,
}

#[derive(Debug)]
struct NodeState {
    cpu_utilization:       f64,
    memory_utilization:    f64,
    bandwidth_utilization: f64,
    network_latency_ms:    f64,
    service_density:       usize,
    cpu_window:            SlidingWindow,
}

#[derive(Debug)]
struct ChainState {
    members:                  Vec<ServiceId>,
    end_to_end_latency_ms:    f64,
    max_service_latency_ms:   f64,
    min_service_latency_ms:   f64,
    communication_latency_ms: f64,
    completion_rate:          f64,
    latency_window:           SlidingWindow,
    reported_success:         u64,
    reported_total:           u64,
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub base_interval:    Duration,
    pub min_interval:     Duration,
    pub epsilon_resource: f64,
    pub epsilon_latency:  f64,
    pub history_size:     usize,
    pub window_size:      WindowSize,
}

/// Watches services, nodes and chains, each on its own variance-driven
/// cadence, and aggregates everything into atomic snapshots at 1 Hz.
pub struct Monitor {
    graph:     Arc<DependencyGraph>,
    registry:  Arc<NodeRegistry>,
    placement: Arc<PlacementTable>,
    probe:     Arc<dyn NodeProbe>,
    settings:  SamplingSettings,

    service_states: DashMap<ServiceId, ServiceState>,
    node_states:    DashMap<NodeId, NodeState>,
    chain_states:   DashMap<ChainId, ChainState>,

    sampling_intervals: DashMap<MonitoredEntity, Duration>,
    metric_variances:   DashMap<MonitoredEntity, f64>,

    latest:  RwLock<Arc<MonitoringData>>,
    history: Mutex<VecDeque<Arc<MonitoringData>>>,

    running:  AtomicBool,
    shutdown: Notify,
    tasks:    Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(
        graph: Arc<DependencyGraph>,
        registry: Arc<NodeRegistry>,
        placement: Arc<PlacementTable>,
        probe: Arc<dyn NodeProbe>,
        settings: SamplingSettings,
    ) -> Self {
        let monitor = Self {
            graph,
            registry,
            placement,
            probe,
            settings,
            service_states: DashMap::new(),
            node_states: DashMap::new(),
            chain_states: DashMap::new(),
            sampling_intervals: DashMap::new(),
            metric_variances: DashMap::new(),
            latest: RwLock::new(Arc::new(MonitoringData::default())),
            history: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        };

        for service in monitor.graph.services() {
            monitor.track_service(service.id().clone());
        }
        let mut node_ids = Vec::new();
        monitor.registry.for_each(|node| node_ids.push(node.id().clone()));
        for node in node_ids {
            monitor.track_node(node);
        }

        monitor
    }

    fn track_service(&self, id: ServiceId) {
        self.service_states.insert(
            id.clone(),
            ServiceState {
                cpu_utilization:       0.0,
                memory_utilization:    0.0,
                bandwidth_utilization: 0.0,
                processing_latency_ms: 0.0,
                queue_length:          0.0,
                request_rate:          0.0,
                latency_window:        SlidingWindow::new(
                    self.settings.window_size,
                ),
            },
        );
        self.seed_entity(MonitoredEntity::Service(id));
    }

    fn track_node(&self, id: NodeId) {
        self.node_states.insert(
            id.clone(),
            NodeState {
                cpu_utilization:       0.0,
                memory_utilization:    0.0,
                bandwidth_utilization: 0.0,
                network_latency_ms:    0.0,
                service_density:       0,
                cpu_window:            SlidingWindow::new(
                    self.settings.window_size,
                ),
            },
        );
        self.seed_entity(MonitoredEntity::Node(id));
    }

    fn seed_entity(&self, entity: MonitoredEntity) {
        self.sampling_intervals
            .insert(entity.clone(), self.settings.base_interval);
        self.metric_variances.insert(entity, INITIAL_VARIANCE);
    }

    /// Start tracking a chain. When the monitor is already running, a
    /// sampler for it is spawned on the spot.
    pub async fn register_chain(
        self: &Arc<Self>,
        id: ChainId,
        members: Vec<ServiceId>,
    ) {
        self.chain_states.insert(
            id.clone(),
            ChainState {
                members,
                end_to_end_latency_ms: 0.0,
                max_service_latency_ms: 0.0,
                min_service_latency_ms: 0.0,
                communication_latency_ms: 0.0,
                completion_rate: 0.0,
                latency_window: SlidingWindow::new(
                    self.settings.window_size,
                ),
                reported_success: 0,
                reported_total: 0,
            },
        );
        let entity = MonitoredEntity::Chain(id);
        self.seed_entity(entity.clone());

        if self.running.load(Ordering::SeqCst) {
            let handle = tokio::spawn(self.clone().run_sampler(entity));
            self.tasks.lock().await.push(handle);
        }
    }

    /// Spawn the aggregator and one sampler per tracked entity.
    /// Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("starting monitor background tasks");

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(self.clone().run_aggregator()));

        let mut entities: Vec<MonitoredEntity> = Vec::new();
        entities.extend(
            self.service_states
                .iter()
                .map(|e| MonitoredEntity::Service(e.key().clone())),
        );
        entities.extend(
            self.node_states
                .iter()
                .map(|e| MonitoredEntity::Node(e.key().clone())),
        );
        entities.extend(
            self.chain_states
                .iter()
                .map(|e| MonitoredEntity::Chain(e.key().clone())),
        );
        for entity in entities {
            tasks.push(tokio::spawn(self.clone().run_sampler(entity)));
        }
    }

    /// Stop all background activity: flip the flag, wake the sleepers,
    /// and join everything within a shared grace budget. Stragglers are
    /// aborted. Idempotent.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("stopping monitor background tasks");
        self.shutdown.notify_waiters();

        let handles: Vec<JoinHandle<()>> =
            self.tasks.lock().await.drain(..).collect();

        let mut join_error = None;
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for mut handle in handles {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            match timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    join_error = Some(
                        anyhow!(err).context("monitor task failed"),
                    );
                }
                Err(_) => {
                    warn!("monitor task did not stop in time, aborting it");
                    handle.abort();
                }
            }
        }

        match join_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_aggregator(self: Arc<Self>) {
        let mut ticker = interval(AGGREGATION_PERIOD);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.aggregate_snapshot().await;
        }
    }

    async fn run_sampler(self: Arc<Self>, entity: MonitoredEntity) {
        loop {
            let pause = self
                .sampling_intervals
                .get(&entity)
                .map(|e| *e.value())
                .unwrap_or(self.settings.base_interval);
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = sleep(pause) => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.sample(&entity).await;
            self.retune_interval(&entity);
        }
        trace!(%entity, "sampler exited");
    }

    async fn sample(&self, entity: &MonitoredEntity) {
        match entity {
            MonitoredEntity::Service(id) => self.sample_service(id).await,
            MonitoredEntity::Node(id) => self.sample_node(id).await,
            MonitoredEntity::Chain(id) => self.sample_chain(id),
        }
    }

    async fn sample_service(&self, id: &ServiceId) {
        // An unplaced service has nothing to measure.
        let Some(node_id) = self.placement.node_of(id) else {
            return;
        };
        let Some(utilization) = self.utilization_of(&node_id).await else {
            return;
        };

        let latency = self
            .probe
            .processing_latency_ms(id, utilization.cpu)
            .await;
        let queue = self.probe.queue_length(id, utilization.cpu).await;
        let rate = self.probe.request_rate(id).await;

        let Some(mut state) = self.service_states.get_mut(id) else {
            return;
        };
        let state = state.value_mut();
        state.cpu_utilization = utilization.cpu;
        state.memory_utilization = utilization.memory;
        state.bandwidth_utilization = utilization.bandwidth;
        state.processing_latency_ms = latency;
        state.queue_length = queue;
        state.request_rate = rate;
        state.latency_window.push(latency);
    }

    async fn sample_node(&self, id: &NodeId) {
        let Some(utilization) = self.utilization_of(id).await else {
            return;
        };

        let mut peer_ids = Vec::new();
        self.registry.for_each(|node| {
            if node.id() != id {
                peer_ids.push(node.id().clone());
            }
        });
        let network_latency_ms = if peer_ids.is_empty() {
            0.0
        } else {
            let total: f64 = peer_ids
                .iter()
                .filter_map(|peer| {
                    self.registry
                        .delay_between(id, peer)
                        .ok()
                        .map(|d| d.get::<millisecond>())
                })
                .sum();
            total / peer_ids.len() as f64
        };
        let density = self
            .registry
            .with_node(id, |node| node.service_count())
            .unwrap_or(0);

        let Some(mut state) = self.node_states.get_mut(id) else {
            return;
        };
        let state = state.value_mut();
        state.cpu_utilization = utilization.cpu;
        state.memory_utilization = utilization.memory;
        state.bandwidth_utilization = utilization.bandwidth;
        state.network_latency_ms = network_latency_ms;
        state.service_density = density;
        state.cpu_window.push(utilization.cpu);
    }

    fn sample_chain(&self, id: &ChainId) {
        let Some(members) = self
            .chain_states
            .get(id)
            .map(|state| state.members.clone())
        else {
            return;
        };
        if members.is_empty() {
            return;
        }

        let mut processing_total = 0.0;
        let mut max_latency = f64::MIN;
        let mut min_latency = f64::MAX;
        let mut completion_rate = f64::MAX;
        for member in &members {
            let Some(state) = self.service_states.get(member) else {
                continue;
            };
            let latency = state.processing_latency_ms;
            processing_total += latency;
            max_latency = max_latency.max(latency);
            min_latency = min_latency.min(latency);
            completion_rate = completion_rate.min(state.request_rate);
        }
        if min_latency == f64::MAX {
            return;
        }

        let communication = self.chain_communication_latency(&members);
        let end_to_end = processing_total + communication;

        let Some(mut state) = self.chain_states.get_mut(id) else {
            return;
        };
        let state = state.value_mut();
        state.end_to_end_latency_ms = end_to_end;
        state.max_service_latency_ms = max_latency;
        state.min_service_latency_ms = min_latency;
        state.communication_latency_ms = communication;
        state.completion_rate =
            if completion_rate == f64::MAX { 0.0 } else { completion_rate };
        state.latency_window.push(end_to_end);
    }

    /// Hop-by-hop communication latency: colocated members cost 1 ms,
    /// remote hops cost the producing node's recorded delay, and hops
    /// whose producer is unknown fall back to 30 ms.
    fn chain_communication_latency(&self, members: &[ServiceId]) -> f64 {
        let mut total = 0.0;
        for pair in members.windows(2) {
            let (Some(source_node), Some(target_node)) = (
                self.placement.node_of(&pair[0]),
                self.placement.node_of(&pair[1]),
            ) else {
                continue;
            };
            if source_node == target_node {
                total += LOCAL_HOP_MS;
            } else {
                total += self
                    .registry
                    .delay_between(&source_node, &target_node)
                    .map(|d| d.get::<millisecond>())
                    .unwrap_or(UNKNOWN_HOP_MS);
            }
        }
        total
    }

    async fn utilization_of(
        &self,
        node: &NodeId,
    ) -> Option<crate::repository::node_probe::UtilizationSample> {
        if let Some(sample) = self.probe.node_utilization(node).await {
            return Some(sample);
        }
        self.registry
            .with_node(node, |n| {
                let capacity = n.capacity();
                crate::repository::node_probe::UtilizationSample {
                    cpu:       capacity.cpu_utilization(),
                    memory:    capacity.memory_utilization(),
                    bandwidth: capacity.bandwidth_utilization(),
                }
            })
            .ok()
    }

    /// Variance-driven re-arm:
    /// `t = min(Lsla/10, max(Tmin, Tbase * min(1, sqrt(eps / max(v, 1e-3)))))`.
    fn retune_interval(&self, entity: &MonitoredEntity) {
        let variance = self.current_variance(entity);
        self.metric_variances.insert(entity.clone(), variance);

        let epsilon = match entity {
            MonitoredEntity::Node(_) => self.settings.epsilon_resource,
            _ => self.settings.epsilon_latency,
        };
        let base_ms = self.settings.base_interval.as_secs_f64() * 1000.0;
        let proposed_ms = base_ms
            * 1f64.min((epsilon / variance.max(VARIANCE_FLOOR)).sqrt());

        let min_ms = self.settings.min_interval.as_secs_f64() * 1000.0;
        let cap_ms = entity.sla_latency_ms() / 10.0;
        let clamped_ms = cap_ms.min(min_ms.max(proposed_ms));

        self.sampling_intervals.insert(
            entity.clone(),
            Duration::from_secs_f64(clamped_ms / 1000.0),
        );
    }

    fn current_variance(&self, entity: &MonitoredEntity) -> f64 {
        match entity {
            MonitoredEntity::Node(id) => self
                .node_states
                .get(id)
                .map(|state| state.cpu_window.variance()),
            MonitoredEntity::Service(id) => self
                .service_states
                .get(id)
                .map(|state| state.latency_window.normalized_variance()),
            MonitoredEntity::Chain(id) => self
                .chain_states
                .get(id)
                .map(|state| state.latency_window.normalized_variance()),
        }
        .unwrap_or(INITIAL_VARIANCE)
    }

    pub fn sampling_interval(
        &self,
        entity: &MonitoredEntity,
    ) -> Option<Duration> {
        self.sampling_intervals.get(entity).map(|e| *e.value())
    }

    pub fn metric_variance(&self, entity: &MonitoredEntity) -> Option<f64> {
        self.metric_variances.get(entity).map(|e| *e.value())
    }

    async fn aggregate_snapshot(&self) {
        let mut data = MonitoringData {
            timestamp: Utc::now(),
            ..MonitoringData::default()
        };

        for entry in self.service_states.iter() {
            let state = entry.value();
            data.services.insert(
                entry.key().clone(),
                ServiceMetrics {
                    service_id:            entry.key().clone(),
                    cpu_utilization:       state.cpu_utilization,
                    memory_utilization:    state.memory_utilization,
                    bandwidth_utilization: state.bandwidth_utilization,
                    processing_latency_ms: state.processing_latency_ms,
                    queue_length:          state.queue_length,
                    request_rate:          state.request_rate,
                    latency_dispersion:    state
                        .latency_window
                        .normalized_variance(),
                },
            );
        }

        for entry in self.node_states.iter() {
            let state = entry.value();
            data.nodes.insert(
                entry.key().clone(),
                NodeMetrics {
                    node_id:               entry.key().clone(),
                    cpu_utilization:       state.cpu_utilization,
                    memory_utilization:    state.memory_utilization,
                    bandwidth_utilization: state.bandwidth_utilization,
                    network_latency_ms:    state.network_latency_ms,
                    service_density:       state.service_density,
                },
            );
        }

        for entry in self.chain_states.iter() {
            let state = entry.value();
            data.chains.insert(
                entry.key().clone(),
                ChainMetrics {
                    chain_id:                 entry.key().clone(),
                    end_to_end_latency_ms:    state.end_to_end_latency_ms,
                    max_service_latency_ms:   state.max_service_latency_ms,
                    min_service_latency_ms:   state.min_service_latency_ms,
                    communication_latency_ms: state
                        .communication_latency_ms,
                    completion_rate:          state.completion_rate,
                    latency_dispersion:       state
                        .latency_window
                        .normalized_variance(),
                    reported_success_ratio:   if state.reported_total == 0 {
                        0.0
                    } else {
                        state.reported_success as f64
                            / state.reported_total as f64
                    },
                },
            );
        }

        let data = Arc::new(data);
        *self.latest.write().await = data.clone();

        let mut history = self.history.lock().await;
        history.push_back(data);
        while history.len() > self.settings.history_size {
            history.pop_front();
        }
    }

    /// Latest aggregated snapshot; a default (empty) snapshot before the
    /// first aggregation.
    pub async fn latest(&self) -> Arc<MonitoringData> {
        self.latest.read().await.clone()
    }

    pub async fn history(&self) -> Vec<Arc<MonitoringData>> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn service_history(
        &self,
        id: &ServiceId,
    ) -> Vec<ServiceMetrics> {
        self.history
            .lock()
            .await
            .iter()
            .filter_map(|snapshot| snapshot.services.get(id).cloned())
            .collect()
    }

    /// Let a live feed overwrite a service's current metrics.
    pub fn ingest_service_metrics(
        &self,
        id: &ServiceId,
        cpu_utilization: f64,
        memory_utilization: f64,
        processing_latency_ms: f64,
        queue_length: f64,
        request_rate: f64,
    ) {
        let Some(mut state) = self.service_states.get_mut(id) else {
            return;
        };
        let state = state.value_mut();
        state.cpu_utilization = cpu_utilization;
        state.memory_utilization = memory_utilization;
        state.processing_latency_ms = processing_latency_ms;
        state.queue_length = queue_length;
        state.request_rate = request_rate;
        state.latency_window.push(processing_latency_ms);
    }

    /// Feed one observed chain execution into the chain's statistics.
    pub fn record_chain_completion(
        &self,
        chain: &ChainId,
        latency_ms: f64,
        succeeded: bool,
    ) {
        let Some(mut state) = self.chain_states.get_mut(chain) else {
            return;
        };
        let state = state.value_mut();
        state.reported_total += 1;
        if succeeded {
            state.reported_success += 1;
        }
        state.latency_window.push(latency_ms);
    }

    pub fn chain_members(&self, chain: &ChainId) -> Option<Vec<ServiceId>> {
        self.chain_states
            .get(chain)
            .map(|state| state.members.clone())
    }

    /// Success ratio of the executions reported so far; `None` before the
    /// first report, so callers can tell "no data" from "all failed".
    pub fn chain_success_ratio(&self, chain: &ChainId) -> Option<f64> {
        self.chain_states.get(chain).and_then(|state| {
            if state.reported_total == 0 {
                None
            } else {
                Some(
                    state.reported_success as f64
                        / state.reported_total as f64,
                )
            }
        })
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chain_states
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Pearson correlation of two services' current utilization triples;
    /// 0 whenever either pattern is flat. High values flag colocation
    /// candidates that would step on each other.
    pub fn interference(&self, a: &ServiceId, b: &ServiceId) -> f64 {
        let (Some(state_a), Some(state_b)) =
            (self.service_states.get(a), self.service_states.get(b))
        else {
            return 0.0;
        };

        let triple_a = [
            state_a.cpu_utilization,
            state_a.memory_utilization,
            state_a.bandwidth_utilization,
        ];
        let triple_b = [
            state_b.cpu_utilization,
            state_b.memory_utilization,
            state_b.bandwidth_utilization,
        ];
        pearson(&triple_a, &triple_b)
    }

    /// Force one immediate sample of every entity. Mainly useful to
    /// bring the state up to date without waiting for the samplers.
    /// Chains go last so they see the fresh service figures.
    pub async fn sample_all(&self) {
        let services: Vec<ServiceId> = self
            .service_states
            .iter()
            .map(|e| e.key().clone())
            .collect();
        futures::future::join_all(
            services.iter().map(|id| self.sample_service(id)),
        )
        .await;

        let nodes: Vec<NodeId> =
            self.node_states.iter().map(|e| e.key().clone()).collect();
        futures::future::join_all(
            nodes.iter().map(|id| self.sample_node(id)),
        )
        .await;

        let chains: Vec<ChainId> =
            self.chain_states.iter().map(|e| e.key().clone()).collect();
        for chain in &chains {
            self.sample_chain(chain);
        }

        self.aggregate_snapshot().await;
    }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let covariance: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / n as f64;
    let stdev_a = (a.iter().map(|x| (x - mean_a).powi(2)).sum::<f64>()
        / n as f64)
        .sqrt();
    let stdev_b = (b.iter().map(|y| (y - mean_b).powi(2)).sum::<f64>()
        / n as f64)
        .sqrt();

    if stdev_a > 0.0 && stdev_b > 0.0 {
        covariance / (stdev_a * stdev_b)
    } else {
        0.0
    }
}
