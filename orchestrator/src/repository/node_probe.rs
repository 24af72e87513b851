use async_trait::async_trait;
use chrono::{Timelike, Utc};
use model::{NodeId, ServiceId};
use rand::Rng;

/// Utilization triple reported by a probe, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationSample {
    pub cpu:       f64,
    pub memory:    f64,
    pub bandwidth: f64,
}

/// Telemetry seam of the monitor. A live implementation would query node
/// agents; the shipped synthetic implementation generates plausible
/// figures from the hosting node's utilization.
#[async_trait]
pub trait NodeProbe: Send + Sync {
    /// Measured utilization of a node, when the probe has its own view.
    /// `None` falls back to the registry's capacity accounting.
    async fn node_utilization(
        &self,
        node: &NodeId,
    ) -> Option<UtilizationSample>;

    /// Processing latency of one service invocation, in milliseconds,
    /// given the hosting node's CPU utilization.
    async fn processing_latency_ms(
        &self,
        service: &ServiceId,
        cpu_utilization: f64,
    ) -> f64;

    async fn queue_length(
        &self,
        service: &ServiceId,
        cpu_utilization: f64,
    ) -> f64;

    /// Current request arrival rate, in requests per second.
    async fn request_rate(&self, service: &ServiceId) -> f64;
}

/// Deterministic base figures with bounded noise on top. The formulas are
/// part of the contract so tests can mirror them:
///
/// - base latency `(hash % 10 + 5) * 5` ms, times
///   `1 + ((U - 0.7) / 0.3)^2 * 5` when CPU utilization U > 0.7, times
///   uniform noise in [0.9, 1.1];
/// - base queue length `hash % 5 + 1`, times `exp((U - 0.6) * 5)` above
///   U = 0.6, times uniform noise in [0.8, 1.2];
/// - base request rate `(hash % 20 + 5) * 2` req/s, times the diurnal
///   factor `0.7 + 0.6 sin(pi (hour - 6) / 12)` (UTC), times uniform
///   noise in [0.9, 1.1].
#[derive(Debug, Default)]
pub struct SyntheticProbe;

impl SyntheticProbe {
    pub fn new() -> Self { Self }

    pub fn base_latency_ms(service: &ServiceId) -> f64 {
        ((stable_hash(service.as_str()) % 10) + 5) as f64 * 5.0
    }

    pub fn base_queue_length(service: &ServiceId) -> f64 {
        ((stable_hash(service.as_str()) % 5) + 1) as f64
    }

    pub fn base_request_rate(service: &ServiceId) -> f64 {
        ((stable_hash(service.as_str()) % 20) + 5) as f64 * 2.0
    }

    pub fn congestion_factor(cpu_utilization: f64) -> f64 {
        if cpu_utilization > 0.7 {
            let overload = (cpu_utilization - 0.7) / 0.3;
            1.0 + overload * overload * 5.0
        } else {
            1.0
        }
    }

    pub fn queue_amplifier(cpu_utilization: f64) -> f64 {
        if cpu_utilization > 0.6 {
            ((cpu_utilization - 0.6) * 5.0).exp()
        } else {
            1.0
        }
    }

    pub fn diurnal_factor(hour: u32) -> f64 {
        0.7 + 0.6
            * (std::f64::consts::PI * (hour as f64 - 6.0) / 12.0).sin()
    }
}

#[async_trait]
impl NodeProbe for SyntheticProbe {
    async fn node_utilization(
        &self,
        _node: &NodeId,
    ) -> Option<UtilizationSample> {
        None
    }

    async fn processing_latency_ms(
        &self,
        service: &ServiceId,
        cpu_utilization: f64,
    ) -> f64 {
        let noise = rand::thread_rng().gen_range(0.9..=1.1);
        Self::base_latency_ms(service)
            * Self::congestion_factor(cpu_utilization)
            * noise
    }

    async fn queue_length(
        &self,
        service: &ServiceId,
        cpu_utilization: f64,
    ) -> f64 {
        let noise = rand::thread_rng().gen_range(0.8..=1.2);
        Self::base_queue_length(service)
            * Self::queue_amplifier(cpu_utilization)
            * noise
    }

    async fn request_rate(&self, service: &ServiceId) -> f64 {
        let noise = rand::thread_rng().gen_range(0.9..=1.1);
        Self::base_request_rate(service)
            * Self::diurnal_factor(Utc::now().hour())
            * noise
    }
}

/// FNV-1a over the id bytes; stable across runs so the synthetic figures
/// are reproducible.
pub fn stable_hash(value: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in value.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
