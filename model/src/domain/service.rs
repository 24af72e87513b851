use uom::si::f64::{Information, Time};
use uom::si::time::millisecond;

use super::resources::ResourceRequirements;
use crate::ServiceId;

/// Workload sensitivity of the dynamic demand estimate.
const WORKLOAD_SENSITIVITY: f64 = 0.5;
/// CPU utilization above which demand grows exponentially.
const UTILIZATION_KNEE: f64 = 0.8;
const SURGE_GROWTH_RATE: f64 = 2.0;

/// A microservice and its baseline runtime profile.
///
/// The service does not know where it runs; placement is kept in a
/// separate table owned by the deployer.
#[derive(Debug, Clone)]
pub struct Microservice {
    id:             ServiceId,
    requirements:   ResourceRequirements,
    execution_time: Time,
    service_rate:   f64,
}

impl Microservice {
    pub fn new(
        id: ServiceId,
        requirements: ResourceRequirements,
        execution_time: Time,
    ) -> Self {
        let execution_ms = execution_time.get::<millisecond>();
        let service_rate =
            if execution_ms > 0.0 { 1.0 / execution_ms } else { 0.0 };
        Self { id, requirements, execution_time, service_rate }
    }

    pub fn id(&self) -> &ServiceId { &self.id }

    pub fn requirements(&self) -> &ResourceRequirements { &self.requirements }

    pub fn execution_time(&self) -> Time { self.execution_time }

    /// µ, in requests per millisecond.
    pub fn service_rate(&self) -> f64 { self.service_rate }

    /// Demand adjusted for the current workload: the base triple scaled by
    /// `1 + 0.5 (λ/µ - 1)`, with cpu and memory additionally inflated by
    /// `exp(2 (U - 0.8))` once CPU utilization passes the knee.
    pub fn dynamic_requirements(
        &self,
        request_rate: f64,
        cpu_utilization: f64,
    ) -> ResourceRequirements {
        let load_factor = if self.service_rate > 0.0 {
            1.0 + WORKLOAD_SENSITIVITY
                * (request_rate / self.service_rate - 1.0)
        } else {
            1.0
        };
        let surge_factor = if cpu_utilization <= UTILIZATION_KNEE {
            1.0
        } else {
            (SURGE_GROWTH_RATE * (cpu_utilization - UTILIZATION_KNEE)).exp()
        };

        ResourceRequirements {
            cpu:       self.requirements.cpu * (load_factor * surge_factor),
            memory:    self.requirements.memory
                * (load_factor * surge_factor),
            bandwidth: self.requirements.bandwidth * load_factor,
        }
    }
}

/// A dependency between two services, weighted by the data it moves and
/// how often it fires.
#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub source:      ServiceId,
    pub target:      ServiceId,
    pub data_volume: Information,
    pub frequency:   f64,
}
