use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChainId, NodeId, ServiceId};

/// Point-in-time metrics of a single service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub service_id:            ServiceId,
    pub cpu_utilization:       f64,
    pub memory_utilization:    f64,
    pub bandwidth_utilization: f64,
    pub processing_latency_ms: f64,
    pub queue_length:          f64,
    pub request_rate:          f64,
    /// Scale-free latency dispersion over the recent window.
    pub latency_dispersion:    f64,
}

/// Point-in-time metrics of a compute node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub node_id:               NodeId,
    pub cpu_utilization:       f64,
    pub memory_utilization:    f64,
    pub bandwidth_utilization: f64,
    /// Mean one-way delay towards the rest of the fleet.
    pub network_latency_ms:    f64,
    pub service_density:       usize,
}

/// Point-in-time metrics of a service chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetrics {
    pub chain_id:                 ChainId,
    pub end_to_end_latency_ms:    f64,
    pub max_service_latency_ms:   f64,
    pub min_service_latency_ms:   f64,
    pub communication_latency_ms: f64,
    /// Bottleneck throughput: the minimum request rate along the chain.
    pub completion_rate:          f64,
    pub latency_dispersion:       f64,
    /// Share of reported chain executions that succeeded.
    pub reported_success_ratio:   f64,
}

/// One aggregated snapshot of everything the monitor watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringData {
    pub timestamp: DateTime<Utc>,
    pub services:  HashMap<ServiceId, ServiceMetrics>,
    pub nodes:     HashMap<NodeId, NodeMetrics>,
    pub chains:    HashMap<ChainId, ChainMetrics>,
}

impl Default for MonitoringData {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            services:  HashMap::new(),
            nodes:     HashMap::new(),
            chains:    HashMap::new(),
        }
    }
}
