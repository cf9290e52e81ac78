use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::severity::{PerSeverity, Severity};
use crate::ConfigError;

/// How the release step ramps a throttled device back toward state 0 once
/// its linked power rail falls under (or over, with `high_power_check`) the
/// severity-indexed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReleaseLogic {
    /// Below budget decrements the step toward negative (extra throttling
    /// headroom); over budget resets to 0.
    Increase,
    /// Below budget increments the step; over budget resets to 0.
    Decrease,
    /// Below budget increments, over budget decrements. The only
    /// bidirectional ramp.
    Stepwise,
    /// Binary: 0 when over budget, max state otherwise.
    ReleaseToFloor,
    #[default]
    None,
}

impl std::fmt::Display for ReleaseLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-cooling-device throttling parameters bound to one sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundCdevConfig {
    /// PID distribution weight per severity. `None` or 0 excludes the device
    /// from PID allocation at that severity.
    pub cdev_weight_for_pid: PerSeverity<Option<f64>>,
    /// Severity-indexed hard-limit request table.
    pub limit_info: PerSeverity<usize>,
    /// Severity-indexed upper bound on the resolved request.
    pub cdev_ceiling: PerSeverity<usize>,
    /// Severity-indexed lower bound applied while a release step is active.
    pub cdev_floor_with_power_link: PerSeverity<usize>,
    /// Power rail whose measured power feeds allocation and release.
    pub power_rail: Option<String>,
    /// Severity-indexed release thresholds in mW.
    pub power_thresholds: PerSeverity<Option<f64>>,
    pub release_logic: ReleaseLogic,
    /// Invert the threshold comparison: "over budget" means below threshold.
    pub high_power_check: bool,
    /// Throttling decisions require live telemetry on the linked rail.
    pub throttling_with_power_link: bool,
    /// Max states released per cycle. `None` is unlimited.
    pub max_release_step: Option<usize>,
    /// Max states throttled per cycle. `None` is unlimited.
    pub max_throttle_step: Option<usize>,
    pub enabled: bool,
}

impl Default for BoundCdevConfig {
    fn default() -> Self {
        Self {
            cdev_weight_for_pid: [None; Severity::COUNT],
            limit_info: [0; Severity::COUNT],
            cdev_ceiling: [usize::MAX; Severity::COUNT],
            cdev_floor_with_power_link: [0; Severity::COUNT],
            power_rail: None,
            power_thresholds: [None; Severity::COUNT],
            release_logic: ReleaseLogic::None,
            high_power_check: false,
            throttling_with_power_link: false,
            max_release_step: None,
            max_throttle_step: None,
            enabled: true,
        }
    }
}

impl BoundCdevConfig {
    /// Whether any severity level carries a usable PID weight.
    pub fn has_pid_weight(&self) -> bool {
        self.cdev_weight_for_pid
            .iter()
            .any(|w| matches!(w, Some(weight) if *weight > 0.0))
    }

    /// Whether any severity level carries a hard limit.
    pub fn has_hard_limit(&self) -> bool {
        self.limit_info.iter().any(|limit| *limit > 0)
    }

    /// Whether the device participates in release/hysteresis ramping.
    pub fn has_release_threshold(&self) -> bool {
        self.power_rail.is_some() && self.power_thresholds.iter().any(Option::is_some)
    }
}

/// PID power-budget controller configuration for one sensor, with the set
/// of bound cooling devices and optional profiles that swap that set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlingConfig {
    /// Proportional gain applied when the error is negative (overshoot).
    pub k_po: PerSeverity<f64>,
    /// Proportional gain applied when the error is non-negative (undershoot).
    pub k_pu: PerSeverity<f64>,
    /// Integral gain for negative error.
    pub k_io: PerSeverity<f64>,
    /// Integral gain for positive error.
    pub k_iu: PerSeverity<f64>,
    pub k_d: PerSeverity<f64>,
    /// The integral accumulates only while the error is below this cutoff.
    pub i_cutoff: PerSeverity<f64>,
    /// Magnitude clamp on the integral accumulator.
    pub i_max: PerSeverity<f64>,
    /// Initial integral accumulator value.
    pub i_default: f64,
    /// Alternative integral seed: percentage of the summed bound-device
    /// power at their current aggregate votes. Takes precedence over
    /// `i_default` when set.
    pub i_default_pct: Option<f64>,
    /// Set-point power per severity state. Sparse: a sensor may configure
    /// set points for only a subset of levels.
    pub s_power: PerSeverity<Option<f64>>,
    pub min_alloc_power: PerSeverity<f64>,
    pub max_alloc_power: PerSeverity<f64>,
    /// Number of cycles over which a budget discontinuity at a severity
    /// state change is blended away. 0 disables blending.
    pub tran_cycle: u32,
    /// Rails whose severity-weighted measured power is subtracted from the
    /// total budget before distribution.
    pub excluded_power: BTreeMap<String, PerSeverity<f64>>,
    /// Default bound cooling-device map.
    pub bound_cdevs: BTreeMap<String, BoundCdevConfig>,
    /// Named profiles swapping the entire bound-device map.
    pub profiles: BTreeMap<String, BTreeMap<String, BoundCdevConfig>>,
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            k_po: [0.0; Severity::COUNT],
            k_pu: [0.0; Severity::COUNT],
            k_io: [0.0; Severity::COUNT],
            k_iu: [0.0; Severity::COUNT],
            k_d: [0.0; Severity::COUNT],
            i_cutoff: [0.0; Severity::COUNT],
            i_max: [f64::MAX; Severity::COUNT],
            i_default: 0.0,
            i_default_pct: None,
            s_power: [None; Severity::COUNT],
            min_alloc_power: [0.0; Severity::COUNT],
            max_alloc_power: [f64::MAX; Severity::COUNT],
            tran_cycle: 0,
            excluded_power: BTreeMap::new(),
            bound_cdevs: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }
}

impl ThrottlingConfig {
    /// Bound-device map for `profile`, falling back to the default map when
    /// the profile is empty or unknown.
    pub fn bound_cdevs_for(&self, profile: &str) -> &BTreeMap<String, BoundCdevConfig> {
        self.profiles.get(profile).unwrap_or(&self.bound_cdevs)
    }
}

/// Predictor-driven PID compensation: weighted sum over predicted future
/// temperatures of (set point - prediction), scaled by a severity-indexed
/// gain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PredictorConfig {
    pub prediction_weights: Vec<f64>,
    pub k_p_compensate: PerSeverity<f64>,
}

/// Immutable per-sensor configuration, loaded once at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Set-point temperature per severity state.
    pub hot_thresholds: PerSeverity<f64>,
    /// Scale applied to raw predictor outputs before comparison against the
    /// set point.
    pub multiplier: f64,
    pub throttling: Option<ThrottlingConfig>,
    pub predictor: Option<PredictorConfig>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            hot_thresholds: [f64::MAX; Severity::COUNT],
            multiplier: 1.0,
            throttling: None,
            predictor: None,
        }
    }
}

impl SensorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn bound_cdev_defaults_are_neutral() {
        let cfg = BoundCdevConfig::default();
        assert!(cfg.enabled);
        assert!(!cfg.has_pid_weight());
        assert!(!cfg.has_hard_limit());
        assert!(!cfg.has_release_threshold());
    }

    #[test]
    fn profile_lookup_falls_back_to_default_map() {
        let mut throttling = ThrottlingConfig::default();
        throttling
            .bound_cdevs
            .insert("cpu".into(), BoundCdevConfig::default());
        let mut quiet = BTreeMap::new();
        quiet.insert("gpu".into(), BoundCdevConfig::default());
        throttling.profiles.insert("quiet".into(), quiet);

        assert!(throttling.bound_cdevs_for("").contains_key("cpu"));
        assert!(throttling.bound_cdevs_for("unknown").contains_key("cpu"));
        assert!(throttling.bound_cdevs_for("quiet").contains_key("gpu"));
    }

    #[test]
    fn sensor_config_parses_from_yaml() {
        let yaml = r#"
hot_thresholds: [.inf, 35000.0, 40000.0, 45000.0, 50000.0, 55000.0, 60000.0]
multiplier: 0.001
throttling:
  k_po: [0.0, 0.0, 0.0, 1.2, 1.2, 1.2, 1.2]
  s_power: [null, null, null, 1500.0, 1200.0, 900.0, 600.0]
  tran_cycle: 3
  bound_cdevs:
    cpu-cluster:
      cdev_weight_for_pid: [null, null, null, 1.0, 1.0, 1.0, 1.0]
      power_rail: VDD_CPU
      release_logic: Decrease
"#;
        let config = SensorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.multiplier, 0.001);
        let throttling = config.throttling.unwrap();
        assert_eq!(throttling.tran_cycle, 3);
        assert_eq!(throttling.s_power[Severity::Severe.as_index()], Some(1500.0));
        let cpu = &throttling.bound_cdevs["cpu-cluster"];
        assert_eq!(cpu.power_rail.as_deref(), Some("VDD_CPU"));
        assert_eq!(cpu.release_logic, ReleaseLogic::Decrease);
        assert!(cpu.has_pid_weight());
    }

    #[test]
    fn yaml_errors_surface_as_config_errors() {
        let err = SensorConfig::from_yaml_str("hot_thresholds: [1.0]").unwrap_err();
        assert!(matches!(err, crate::ConfigError::Yaml(_)));
    }
}
