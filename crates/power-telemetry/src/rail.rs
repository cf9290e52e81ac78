use serde::{Deserialize, Serialize};

/// How a virtual rail combines the average power of its linked rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Formula {
    /// Count linked rails whose average crosses their coefficient: a
    /// negative coefficient `-t` counts rails below `t`, a non-negative
    /// coefficient `t` counts rails at or above `t`.
    CountThreshold,
    /// Sum of `average * coefficient` over all linked rails.
    WeightedAvg,
    /// Maximum of `average * coefficient`.
    Maximum,
    /// Minimum of `average * coefficient`.
    Minimum,
}

/// A rail derived from other rails instead of its own energy counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualRailConfig {
    pub linked_rails: Vec<String>,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub offset: f64,
    pub formula: Formula,
}

/// Per-rail sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RailConfig {
    /// Number of samples the averaging window spans. 0 disables the rail.
    pub power_sample_count: usize,
    /// Minimum time between average-power recomputations.
    pub power_sample_delay_ms: u64,
    pub virtual_rail: Option<VirtualRailConfig>,
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            power_sample_count: 1,
            power_sample_delay_ms: 0,
            virtual_rail: None,
        }
    }
}
