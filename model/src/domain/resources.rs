use uom::si::f64::{Information, InformationRate, Ratio};
use uom::si::information::megabyte;
use uom::si::information_rate::megabit_per_second;

use super::core_count::core;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("requested resources exceed the node's available capacity")]
    InsufficientCapacity,
}

/// Baseline resource demand of a microservice, on the three axes tracked
/// by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceRequirements {
    pub cpu:       Ratio,
    pub memory:    Information,
    pub bandwidth: InformationRate,
}

impl ResourceRequirements {
    pub fn new(cpu_cores: f64, memory_mb: f64, bandwidth_mbps: f64) -> Self {
        Self {
            cpu:       Ratio::new::<core>(cpu_cores),
            memory:    Information::new::<megabyte>(memory_mb),
            bandwidth: InformationRate::new::<megabit_per_second>(
                bandwidth_mbps,
            ),
        }
    }

    /// Whether this demand fits in what the capacity has left.
    pub fn fits(&self, capacity: &ResourceCapacity) -> bool {
        self.cpu <= capacity.available_cpu
            && self.memory <= capacity.available_memory
            && self.bandwidth <= capacity.available_bandwidth
    }

    pub fn add(&self, other: &Self) -> Self {
        Self {
            cpu:       self.cpu + other.cpu,
            memory:    self.memory + other.memory,
            bandwidth: self.bandwidth + other.bandwidth,
        }
    }

    /// Pointwise subtraction, clamped at zero on every axis.
    pub fn saturating_sub(&self, other: &Self) -> Self {
        let zero = ResourceRequirements::new(0.0, 0.0, 0.0);
        Self {
            cpu:       if self.cpu > other.cpu {
                self.cpu - other.cpu
            } else {
                zero.cpu
            },
            memory:    if self.memory > other.memory {
                self.memory - other.memory
            } else {
                zero.memory
            },
            bandwidth: if self.bandwidth > other.bandwidth {
                self.bandwidth - other.bandwidth
            } else {
                zero.bandwidth
            },
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            cpu:       self.cpu * factor,
            memory:    self.memory * factor,
            bandwidth: self.bandwidth * factor,
        }
    }
}

/// Total and remaining capacity of a compute node.
///
/// Invariant: `0 <= available <= total` on every axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCapacity {
    total_cpu:       Ratio,
    total_memory:    Information,
    total_bandwidth: InformationRate,

    available_cpu:       Ratio,
    available_memory:    Information,
    available_bandwidth: InformationRate,
}

impl ResourceCapacity {
    pub fn new(cpu_cores: f64, memory_mb: f64, bandwidth_mbps: f64) -> Self {
        let total = ResourceRequirements::new(
            cpu_cores,
            memory_mb,
            bandwidth_mbps,
        );
        Self {
            total_cpu:           total.cpu,
            total_memory:        total.memory,
            total_bandwidth:     total.bandwidth,
            available_cpu:       total.cpu,
            available_memory:    total.memory,
            available_bandwidth: total.bandwidth,
        }
    }

    /// Typical capacity of an edge node.
    pub fn edge_default() -> Self { Self::new(4.0, 8000.0, 100.0) }

    /// Typical capacity of a cloud node.
    pub fn cloud_default() -> Self { Self::new(16.0, 32000.0, 1000.0) }

    /// All-or-nothing reservation: availables shrink iff the whole demand
    /// fits.
    pub fn allocate(
        &mut self,
        requirements: &ResourceRequirements,
    ) -> Result<(), CapacityError> {
        if !requirements.fits(self) {
            return Err(CapacityError::InsufficientCapacity);
        }

        self.available_cpu -= requirements.cpu;
        self.available_memory -= requirements.memory;
        self.available_bandwidth -= requirements.bandwidth;

        Ok(())
    }

    /// Returns previously reserved resources, clamped at the totals.
    pub fn release(&mut self, requirements: &ResourceRequirements) {
        self.available_cpu += requirements.cpu;
        if self.available_cpu > self.total_cpu {
            self.available_cpu = self.total_cpu;
        }
        self.available_memory += requirements.memory;
        if self.available_memory > self.total_memory {
            self.available_memory = self.total_memory;
        }
        self.available_bandwidth += requirements.bandwidth;
        if self.available_bandwidth > self.total_bandwidth {
            self.available_bandwidth = self.total_bandwidth;
        }
    }

    /// Admin-initiated resize. Availables shift by the capacity delta and
    /// stay clamped into `[0, total]`.
    pub fn update_totals(
        &mut self,
        cpu_cores: f64,
        memory_mb: f64,
        bandwidth_mbps: f64,
    ) {
        let new = ResourceRequirements::new(
            cpu_cores,
            memory_mb,
            bandwidth_mbps,
        );
        let zero = ResourceRequirements::new(0.0, 0.0, 0.0);

        self.available_cpu += new.cpu - self.total_cpu;
        self.available_memory += new.memory - self.total_memory;
        self.available_bandwidth += new.bandwidth - self.total_bandwidth;
        self.total_cpu = new.cpu;
        self.total_memory = new.memory;
        self.total_bandwidth = new.bandwidth;

        if self.available_cpu < zero.cpu {
            self.available_cpu = zero.cpu;
        }
        if self.available_memory < zero.memory {
            self.available_memory = zero.memory;
        }
        if self.available_bandwidth < zero.bandwidth {
            self.available_bandwidth = zero.bandwidth;
        }
        if self.available_cpu > self.total_cpu {
            self.available_cpu = self.total_cpu;
        }
        if self.available_memory > self.total_memory {
            self.available_memory = self.total_memory;
        }
        if self.available_bandwidth > self.total_bandwidth {
            self.available_bandwidth = self.total_bandwidth;
        }
    }

    pub fn total_cpu(&self) -> Ratio { self.total_cpu }

    pub fn total_memory(&self) -> Information { self.total_memory }

    pub fn total_bandwidth(&self) -> InformationRate { self.total_bandwidth }

    pub fn available_cpu(&self) -> Ratio { self.available_cpu }

    pub fn available_memory(&self) -> Information { self.available_memory }

    pub fn available_bandwidth(&self) -> InformationRate {
        self.available_bandwidth
    }

    pub fn cpu_utilization(&self) -> f64 {
        utilization(self.total_cpu.value, self.available_cpu.value)
    }

    pub fn memory_utilization(&self) -> f64 {
        utilization(self.total_memory.value, self.available_memory.value)
    }

    pub fn bandwidth_utilization(&self) -> f64 {
        utilization(
            self.total_bandwidth.value,
            self.available_bandwidth.value,
        )
    }

    pub fn average_utilization(&self) -> f64 {
        (self.cpu_utilization()
            + self.memory_utilization()
            + self.bandwidth_utilization())
            / 3.0
    }

    /// Overloaded as soon as a single axis crosses the threshold.
    pub fn is_overloaded(&self, threshold: f64) -> bool {
        self.cpu_utilization() > threshold
            || self.memory_utilization() > threshold
            || self.bandwidth_utilization() > threshold
    }
}

fn utilization(total: f64, available: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (total - available) / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_release_restores_availables() {
        let mut capacity = ResourceCapacity::edge_default();
        let reqs = ResourceRequirements::new(1.5, 2000.0, 30.0);

        capacity.allocate(&reqs).unwrap();
        assert!((capacity.cpu_utilization() - 1.5 / 4.0).abs() < 1e-9);

        capacity.release(&reqs);
        assert_eq!(capacity, ResourceCapacity::edge_default());
    }

    #[test]
    fn allocate_is_all_or_nothing() {
        let mut capacity = ResourceCapacity::new(2.0, 1000.0, 10.0);
        let reqs = ResourceRequirements::new(1.0, 2000.0, 5.0);

        assert_eq!(
            capacity.allocate(&reqs),
            Err(CapacityError::InsufficientCapacity)
        );
        // Nothing was deducted, not even the axes that would have fit.
        assert_eq!(capacity.cpu_utilization(), 0.0);
        assert_eq!(capacity.bandwidth_utilization(), 0.0);
    }

    #[test]
    fn release_clamps_at_totals() {
        let mut capacity = ResourceCapacity::new(2.0, 1000.0, 10.0);
        capacity.release(&ResourceRequirements::new(5.0, 5000.0, 50.0));

        assert_eq!(capacity.cpu_utilization(), 0.0);
        assert_eq!(capacity.memory_utilization(), 0.0);
        assert_eq!(capacity.bandwidth_utilization(), 0.0);
    }

    #[test]
    fn overload_is_per_axis() {
        let mut capacity = ResourceCapacity::new(4.0, 8000.0, 100.0);
        capacity
            .allocate(&ResourceRequirements::new(0.4, 7500.0, 10.0))
            .unwrap();

        // Memory alone crossed the threshold.
        assert!(capacity.is_overloaded(0.8));
        assert!(!capacity.is_overloaded(0.95));
    }

    #[test]
    fn update_totals_shifts_availables() {
        let mut capacity = ResourceCapacity::new(4.0, 8000.0, 100.0);
        capacity
            .allocate(&ResourceRequirements::new(2.0, 4000.0, 50.0))
            .unwrap();

        capacity.update_totals(8.0, 16000.0, 200.0);
        assert!((capacity.available_cpu().get::<core>() - 6.0).abs() < 1e-9);
        assert!((capacity.cpu_utilization() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let a = ResourceRequirements::new(1.0, 500.0, 10.0);
        let b = ResourceRequirements::new(2.0, 100.0, 10.0);
        let diff = a.saturating_sub(&b);

        assert_eq!(diff.cpu.value, 0.0);
        assert!(diff.memory > Information::new::<megabyte>(0.0));
        assert_eq!(diff.bandwidth.value, 0.0);
    }

    #[test]
    fn scale_is_uniform() {
        let reqs = ResourceRequirements::new(1.0, 500.0, 10.0);
        let scaled = reqs.scale(1.3);

        assert!((scaled.cpu.value / reqs.cpu.value - 1.3).abs() < 1e-9);
        assert!((scaled.memory.value / reqs.memory.value - 1.3).abs() < 1e-9);
    }
}
