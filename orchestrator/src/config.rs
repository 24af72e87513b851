use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Tunables of the orchestration core. Defaults match the documented
/// operating point; `from_env` lets deployments override single knobs.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    /// η₀ of the per-node gradient steps.
    pub base_learning_rate:           f64,
    /// λ damping the learning rate under latency variance.
    pub adaptivity_factor:            f64,
    /// Minimum samples before a node may vote in aggregation.
    pub quantity_threshold:           u64,
    /// Minimum quality score before a node may vote in aggregation.
    pub quality_threshold:            f64,
    /// Sampling tolerance for node (resource) metrics.
    pub epsilon_resource:             f64,
    /// Sampling tolerance for service and chain latencies.
    pub epsilon_latency:              f64,
    /// Per-axis utilization above which a node counts as overloaded.
    pub utilization_threshold:        f64,
    pub base_sampling_interval:       Duration,
    pub min_sampling_interval:        Duration,
    /// Snapshots retained in the monitoring ring.
    pub history_size:                 usize,
    /// Samples retained per entity metric window.
    pub window_size:                  usize,
    pub max_refinement_iterations:    usize,
    /// L2 norm of the parameter delta below which refinement stops.
    pub convergence_threshold:        f64,
    /// Share of a node's own adaptation preserved at distribution.
    pub local_blend_ratio:            f64,
    /// A migration must bring the cost to at most this fraction of the
    /// current cost.
    pub migration_improvement_ratio:  f64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            base_learning_rate:          1e-3,
            adaptivity_factor:           0.5,
            quantity_threshold:          3,
            quality_threshold:           0.7,
            epsilon_resource:            0.1,
            epsilon_latency:             0.05,
            utilization_threshold:       0.8,
            base_sampling_interval:      Duration::from_secs(1),
            min_sampling_interval:       Duration::from_millis(100),
            history_size:                100,
            window_size:                 20,
            max_refinement_iterations:   10,
            convergence_threshold:       0.01,
            local_blend_ratio:           0.2,
            migration_improvement_ratio: 0.8,
        }
    }
}

impl OrchestrationConfig {
    /// Defaults, overridden field by field from `ORC_*` environment
    /// variables where present.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        override_from_env(
            &mut config.base_learning_rate,
            "ORC_BASE_LEARNING_RATE",
        )?;
        override_from_env(
            &mut config.adaptivity_factor,
            "ORC_ADAPTIVITY_FACTOR",
        )?;
        override_from_env(
            &mut config.quantity_threshold,
            "ORC_QUANTITY_THRESHOLD",
        )?;
        override_from_env(
            &mut config.quality_threshold,
            "ORC_QUALITY_THRESHOLD",
        )?;
        override_from_env(
            &mut config.epsilon_resource,
            "ORC_EPSILON_RESOURCE",
        )?;
        override_from_env(
            &mut config.epsilon_latency,
            "ORC_EPSILON_LATENCY",
        )?;
        override_from_env(
            &mut config.utilization_threshold,
            "ORC_UTILIZATION_THRESHOLD",
        )?;
        if let Some(seconds) =
            parse_env::<f64>("ORC_BASE_SAMPLING_INTERVAL_S")?
        {
            config.base_sampling_interval =
                Duration::from_secs_f64(seconds);
        }
        if let Some(seconds) =
            parse_env::<f64>("ORC_MIN_SAMPLING_INTERVAL_S")?
        {
            config.min_sampling_interval = Duration::from_secs_f64(seconds);
        }
        override_from_env(&mut config.history_size, "ORC_HISTORY_SIZE")?;
        override_from_env(&mut config.window_size, "ORC_WINDOW_SIZE")?;
        override_from_env(
            &mut config.max_refinement_iterations,
            "ORC_MAX_REFINEMENT_ITERATIONS",
        )?;
        override_from_env(
            &mut config.convergence_threshold,
            "ORC_CONVERGENCE_THRESHOLD",
        )?;
        override_from_env(
            &mut config.local_blend_ratio,
            "ORC_LOCAL_BLEND_RATIO",
        )?;
        override_from_env(
            &mut config.migration_improvement_ratio,
            "ORC_MIGRATION_IMPROVEMENT_RATIO",
        )?;

        Ok(config)
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => Ok(Some(raw.parse::<T>().with_context(|| {
            format!("{name} env var cannot be parsed in the correct type")
        })?)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err)
            .with_context(|| format!("{name} env var is not valid unicode")),
    }
}

fn override_from_env<T>(slot: &mut T, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = parse_env(name)? {
        *slot = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_operating_point() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.quantity_threshold, 3);
        assert_eq!(config.window_size, 20);
        assert_eq!(config.base_sampling_interval, Duration::from_secs(1));
        assert_eq!(
            config.min_sampling_interval,
            Duration::from_millis(100)
        );
        assert!((config.migration_improvement_ratio - 0.8).abs() < 1e-12);
    }

    // Single test: from_env reads process-wide state, parallel tests
    // would race on it.
    #[test]
    fn env_overrides_take_precedence_and_reject_garbage() {
        env::set_var("ORC_WINDOW_SIZE", "40");
        env::set_var("ORC_BASE_SAMPLING_INTERVAL_S", "0.5");
        let config = OrchestrationConfig::from_env().unwrap();
        assert_eq!(config.window_size, 40);
        assert_eq!(
            config.base_sampling_interval,
            Duration::from_millis(500)
        );

        env::set_var("ORC_WINDOW_SIZE", "not-a-number");
        assert!(OrchestrationConfig::from_env().is_err());

        env::remove_var("ORC_WINDOW_SIZE");
        env::remove_var("ORC_BASE_SAMPLING_INTERVAL_S");
    }
}
