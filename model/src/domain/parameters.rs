/// Parameter names as they appear in persisted form and in federated
/// exchanges. The set is fixed.
pub const TEMPORAL_WEIGHT: &str = "temporalWeight";
pub const RESOURCE_WEIGHT: &str = "resourceWeight";
pub const DEPENDENCY_WEIGHT: &str = "dependencyWeight";
pub const CRITICAL_PATH_THRESHOLD: &str = "criticalPathThreshold";
pub const UTILIZATION_THRESHOLD: &str = "utilizationThreshold";
pub const RESOURCE_SCALING_FACTOR: &str = "resourceScalingFactor";
pub const ADAPTATION_FACTOR: &str = "adaptationFactor";

const WEIGHT_SUM_GUARD: f64 = 1e-6;

/// The hyper-parameters steering critical-path scoring and placement,
/// shared between the analyzer, the deployer and the federated optimizer.
///
/// The three criticality weights always sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterVector {
    pub temporal_weight:         f64,
    pub resource_weight:         f64,
    pub dependency_weight:       f64,
    pub critical_path_threshold: f64,
    pub utilization_threshold:   f64,
    pub resource_scaling_factor: f64,
    pub adaptation_factor:       f64,
}

impl Default for ParameterVector {
    fn default() -> Self {
        Self {
            temporal_weight:         0.40,
            resource_weight:         0.35,
            dependency_weight:       0.25,
            critical_path_threshold: 0.70,
            utilization_threshold:   0.80,
            resource_scaling_factor: 0.30,
            adaptation_factor:       0.50,
        }
    }
}

impl ParameterVector {
    /// Ordered `(name, value)` view, the persisted representation.
    pub fn entries(&self) -> [(&'static str, f64); 7] {
        [
            (TEMPORAL_WEIGHT, self.temporal_weight),
            (RESOURCE_WEIGHT, self.resource_weight),
            (DEPENDENCY_WEIGHT, self.dependency_weight),
            (CRITICAL_PATH_THRESHOLD, self.critical_path_threshold),
            (UTILIZATION_THRESHOLD, self.utilization_threshold),
            (RESOURCE_SCALING_FACTOR, self.resource_scaling_factor),
            (ADAPTATION_FACTOR, self.adaptation_factor),
        ]
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries()
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, value)| *value)
    }

    /// Returns false for names outside the fixed set.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match name {
            TEMPORAL_WEIGHT => self.temporal_weight = value,
            RESOURCE_WEIGHT => self.resource_weight = value,
            DEPENDENCY_WEIGHT => self.dependency_weight = value,
            CRITICAL_PATH_THRESHOLD => self.critical_path_threshold = value,
            UTILIZATION_THRESHOLD => self.utilization_threshold = value,
            RESOURCE_SCALING_FACTOR => self.resource_scaling_factor = value,
            ADAPTATION_FACTOR => self.adaptation_factor = value,
            _ => return false,
        }
        true
    }

    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut vector = Self::default();
        for (name, value) in entries {
            vector.set(name, value);
        }
        vector.renormalize_criticality_weights();
        vector
    }

    /// Euclidean distance to another vector, over all named entries.
    pub fn delta_l2(&self, other: &Self) -> f64 {
        self.entries()
            .iter()
            .zip(other.entries().iter())
            .map(|((_, a), (_, b))| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Per-entry blend used when distributing the global model:
    /// `(1 - local_ratio) * global + local_ratio * local`.
    pub fn blended(
        global: &Self,
        local: &Self,
        local_ratio: f64,
    ) -> Self {
        let mut blended = Self::default();
        for ((name, global_value), (_, local_value)) in
            global.entries().iter().zip(local.entries().iter())
        {
            blended.set(
                name,
                (1.0 - local_ratio) * global_value
                    + local_ratio * local_value,
            );
        }
        blended.renormalize_criticality_weights();
        blended
    }

    /// Restore the invariant α + β + γ = 1: negatives clamp to zero, the
    /// triple is divided by its sum, and a vanishing sum snaps the three
    /// weights back to their defaults.
    pub fn renormalize_criticality_weights(&mut self) {
        let alpha = self.temporal_weight.max(0.0);
        let beta = self.resource_weight.max(0.0);
        let gamma = self.dependency_weight.max(0.0);
        let sum = alpha + beta + gamma;

        if sum <= WEIGHT_SUM_GUARD {
            let defaults = Self::default();
            self.temporal_weight = defaults.temporal_weight;
            self.resource_weight = defaults.resource_weight;
            self.dependency_weight = defaults.dependency_weight;
        } else {
            self.temporal_weight = alpha / sum;
            self.resource_weight = beta / sum;
            self.dependency_weight = gamma / sum;
        }
    }

    pub fn criticality_weights(&self) -> (f64, f64, f64) {
        (
            self.temporal_weight,
            self.resource_weight,
            self.dependency_weight,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sum_to_one() {
        let vector = ParameterVector::default();
        let (alpha, beta, gamma) = vector.criticality_weights();
        assert!((alpha + beta + gamma - 1.0).abs() < 1e-9);
    }

    #[test]
    fn delta_l2_of_identical_vectors_is_zero() {
        let vector = ParameterVector::default();
        assert_eq!(vector.delta_l2(&vector), 0.0);
    }

    #[test]
    fn delta_l2_matches_hand_computation() {
        let a = ParameterVector::default();
        let mut b = a;
        b.critical_path_threshold += 0.3;
        b.adaptation_factor -= 0.4;

        assert!((a.delta_l2(&b) - (0.09f64 + 0.16).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn blend_preserves_the_weight_invariant() {
        let global = ParameterVector::default();
        let mut local = global;
        local.temporal_weight = 0.9;
        local.resource_weight = 0.05;
        local.dependency_weight = 0.05;

        let blended = ParameterVector::blended(&global, &local, 0.2);
        let (alpha, beta, gamma) = blended.criticality_weights();
        assert!((alpha + beta + gamma - 1.0).abs() < 1e-9);
        assert!(alpha > global.temporal_weight);
    }

    #[test]
    fn renormalize_clamps_negatives() {
        let mut vector = ParameterVector::default();
        vector.temporal_weight = -0.2;
        vector.resource_weight = 0.6;
        vector.dependency_weight = 0.2;
        vector.renormalize_criticality_weights();

        assert_eq!(vector.temporal_weight, 0.0);
        assert!((vector.resource_weight - 0.75).abs() < 1e-9);
        assert!((vector.dependency_weight - 0.25).abs() < 1e-9);
    }

    #[test]
    fn renormalize_snaps_to_defaults_on_vanishing_sum() {
        let mut vector = ParameterVector::default();
        vector.temporal_weight = 0.0;
        vector.resource_weight = 0.0;
        vector.dependency_weight = 0.0;
        vector.renormalize_criticality_weights();

        assert_eq!(
            vector.criticality_weights(),
            ParameterVector::default().criticality_weights()
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut vector = ParameterVector::default();
        assert!(!vector.set("noSuchParameter", 1.0));
        assert_eq!(vector.get("noSuchParameter"), None);
    }
}
