use std::collections::BTreeMap;

use thermal_types::ThrottlingConfig;

/// Mutable control-loop state for one registered sensor. Created once at
/// registration, reset to neutral values by [`SensorControlState::clear`],
/// updated every control cycle; never destroyed for the life of the
/// service.
#[derive(Debug, Clone)]
pub(crate) struct SensorControlState {
    /// Error of the previous cycle. `None` until the first budget
    /// computation, which then skips the derivative term.
    pub prev_err: Option<f64>,
    /// Integral accumulator, lazily seeded on the first cycle.
    pub i_budget: Option<f64>,
    /// Target severity-state index of the previous cycle.
    pub prev_target: Option<usize>,
    /// Resolved power budget of the previous cycle, transient included.
    pub prev_power_budget: Option<f64>,
    /// Remaining transient-blend cycles.
    pub tran_cycle: u32,
    /// Budget discontinuity captured at the last target-state change.
    pub budget_transient: f64,
    /// Active profile name; empty selects the default bound-device map.
    pub profile: String,
    /// Per-device PID power-budget allocation in mW.
    pub pid_power_budget: BTreeMap<String, f64>,
    /// Per-device PID state request.
    pub pid_cdev_request: BTreeMap<String, usize>,
    /// Per-device hard-limit state request.
    pub hardlimit_cdev_request: BTreeMap<String, usize>,
    /// Per-device release step. Negative values add throttling headroom
    /// under the `Increase` ramp policy.
    pub release_step: BTreeMap<String, i64>,
    /// Per-device resolved ("status") request, the sensor's current vote.
    pub cdev_status: BTreeMap<String, usize>,
}

impl SensorControlState {
    /// Seeds the per-device maps from the throttling config: PID entries
    /// for weighted devices, hard-limit entries for devices with a limit
    /// table, release entries for devices with a rail and thresholds.
    pub fn new(throttling: &ThrottlingConfig) -> Self {
        let mut state = Self {
            prev_err: None,
            i_budget: None,
            prev_target: None,
            prev_power_budget: None,
            tran_cycle: 0,
            budget_transient: 0.0,
            profile: String::new(),
            pid_power_budget: BTreeMap::new(),
            pid_cdev_request: BTreeMap::new(),
            hardlimit_cdev_request: BTreeMap::new(),
            release_step: BTreeMap::new(),
            cdev_status: BTreeMap::new(),
        };

        for (name, bound) in &throttling.bound_cdevs {
            if bound.has_pid_weight() {
                state.pid_power_budget.insert(name.clone(), f64::MAX);
                state.pid_cdev_request.insert(name.clone(), 0);
                state.cdev_status.insert(name.clone(), 0);
            }
            if bound.has_hard_limit() {
                state.hardlimit_cdev_request.insert(name.clone(), 0);
                state.cdev_status.insert(name.clone(), 0);
            }
            if bound.has_release_threshold() {
                state.release_step.insert(name.clone(), 0);
            }
        }
        state
    }

    /// Resets to neutral values (sensor fault/unplug). The resolved status
    /// and aggregate votes are left in place; the next control cycle
    /// recomputes and republishes them.
    pub fn clear(&mut self) {
        for budget in self.pid_power_budget.values_mut() {
            *budget = f64::MAX;
        }
        for request in self.pid_cdev_request.values_mut() {
            *request = 0;
        }
        for request in self.hardlimit_cdev_request.values_mut() {
            *request = 0;
        }
        for step in self.release_step.values_mut() {
            *step = 0;
        }
        self.prev_err = None;
        self.i_budget = None;
        self.prev_target = None;
        self.prev_power_budget = None;
        self.tran_cycle = 0;
        self.budget_transient = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermal_types::{BoundCdevConfig, Severity};

    fn weighted_cdev() -> BoundCdevConfig {
        BoundCdevConfig {
            cdev_weight_for_pid: [Some(1.0); Severity::COUNT],
            ..Default::default()
        }
    }

    #[test]
    fn registration_seeds_maps_per_capability() {
        let mut throttling = ThrottlingConfig::default();
        throttling.bound_cdevs.insert("pid-only".into(), weighted_cdev());
        throttling.bound_cdevs.insert(
            "hardlimit-only".into(),
            BoundCdevConfig {
                limit_info: [2; Severity::COUNT],
                ..Default::default()
            },
        );
        throttling.bound_cdevs.insert(
            "release".into(),
            BoundCdevConfig {
                power_rail: Some("VDD_A".into()),
                power_thresholds: [Some(100.0); Severity::COUNT],
                ..Default::default()
            },
        );

        let state = SensorControlState::new(&throttling);
        assert_eq!(state.pid_power_budget["pid-only"], f64::MAX);
        assert_eq!(state.pid_cdev_request["pid-only"], 0);
        assert!(!state.pid_cdev_request.contains_key("hardlimit-only"));
        assert_eq!(state.hardlimit_cdev_request["hardlimit-only"], 0);
        assert_eq!(state.release_step["release"], 0);
        // Devices participate in status/vote tracking only through PID or
        // hard-limit requests.
        assert_eq!(state.cdev_status.len(), 2);
    }

    #[test]
    fn clear_resets_to_neutral() {
        let mut throttling = ThrottlingConfig::default();
        throttling.bound_cdevs.insert("cpu".into(), weighted_cdev());

        let mut state = SensorControlState::new(&throttling);
        state.prev_err = Some(-3.0);
        state.i_budget = Some(120.0);
        state.prev_target = Some(3);
        state.prev_power_budget = Some(900.0);
        state.tran_cycle = 2;
        state.pid_power_budget.insert("cpu".into(), 500.0);
        state.pid_cdev_request.insert("cpu".into(), 4);
        state.cdev_status.insert("cpu".into(), 4);

        state.clear();
        assert_eq!(state.prev_err, None);
        assert_eq!(state.i_budget, None);
        assert_eq!(state.prev_target, None);
        assert_eq!(state.tran_cycle, 0);
        assert_eq!(state.pid_power_budget["cpu"], f64::MAX);
        assert_eq!(state.pid_cdev_request["cpu"], 0);
        // Status survives; the next cycle republishes it.
        assert_eq!(state.cdev_status["cpu"], 4);
    }
}
