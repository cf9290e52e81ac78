//! Engine surface: sensor registration, per-cycle updates and the
//! cross-sensor aggregate request store.
//!
//! Three stores sit behind independent locks (sensor configs, per-sensor
//! control state, per-device vote multisets). A cycle never holds two of
//! them at once: aggregate votes are snapshotted before the control-state
//! lock is taken and vote changes are applied after it is released, so
//! concurrent sensor cycles cannot deadlock across stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use power_telemetry::PowerSnapshot;
use thermal_types::{CoolingDeviceInfo, SensorConfig, Severity};

use crate::aggregator::RequestVotes;
use crate::error::ThrottleError;
use crate::pid::CycleContext;
use crate::state::SensorControlState;
use crate::{allocator, hardlimit, pid, release, trace};

/// One sensor reading plus the cycle parameters derived from it.
#[derive(Debug, Clone, Copy)]
pub struct SensorUpdate<'a> {
    pub sensor: &'a str,
    /// Temperature in the sensor's own unit, multiplier already applied.
    pub temperature: f64,
    pub severity: Severity,
    /// Time since this sensor's previous cycle.
    pub elapsed: Duration,
    /// Emergency override: pin every PID device to its minimum budget.
    pub max_throttling: bool,
    /// Predicted future temperatures for the predictor compensation term.
    pub predictions: &'a [f64],
}

/// The throttling-decision engine.
pub struct ThermalThrottling {
    cdevs: HashMap<String, CoolingDeviceInfo>,
    configs: RwLock<HashMap<String, Arc<SensorConfig>>>,
    states: RwLock<HashMap<String, SensorControlState>>,
    votes: RwLock<HashMap<String, RequestVotes>>,
}

impl ThermalThrottling {
    pub fn new(cdevs: impl IntoIterator<Item = CoolingDeviceInfo>) -> Self {
        Self {
            cdevs: cdevs
                .into_iter()
                .map(|cdev| (cdev.name().to_string(), cdev))
                .collect(),
            configs: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            votes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a sensor for throttling. Every cooling device bound by the
    /// default map or any profile must be known, and each device the sensor
    /// can drive gets an initial unthrottled vote.
    pub fn register_sensor(&self, name: &str, config: SensorConfig) -> Result<(), ThrottleError> {
        let throttling = config
            .throttling
            .as_ref()
            .ok_or_else(|| ThrottleError::MissingThrottlingConfig(name.to_string()))?;

        let maps = std::iter::once(&throttling.bound_cdevs).chain(throttling.profiles.values());
        for map in maps {
            for cdev in map.keys() {
                if !self.cdevs.contains_key(cdev) {
                    return Err(ThrottleError::UnknownCoolingDevice {
                        sensor: name.to_string(),
                        cdev: cdev.clone(),
                    });
                }
            }
        }

        let state = SensorControlState::new(throttling);

        {
            let mut configs = self.configs.write().expect("poisoned");
            if configs.contains_key(name) {
                return Err(ThrottleError::DuplicateSensor(name.to_string()));
            }
            configs.insert(name.to_string(), Arc::new(config));
        }

        {
            let mut votes = self.votes.write().expect("poisoned");
            for cdev in state.cdev_status.keys() {
                let max_state = self.cdevs[cdev].max_state();
                votes
                    .entry(cdev.clone())
                    .or_insert_with(|| RequestVotes::new(max_state))
                    .insert(0);
            }
        }

        self.states
            .write()
            .expect("poisoned")
            .insert(name.to_string(), state);
        tracing::info!(sensor = name, "sensor registered for throttling");
        Ok(())
    }

    /// Switches the sensor's bound-device map. An unknown profile name logs
    /// a warning and falls back to the default map.
    pub fn set_profile(&self, sensor: &str, profile: &str) -> Result<(), ThrottleError> {
        let config = self.config(sensor)?;
        let throttling = config
            .throttling
            .as_ref()
            .ok_or_else(|| ThrottleError::MissingThrottlingConfig(sensor.to_string()))?;

        let mut states = self.states.write().expect("poisoned");
        let state = states
            .get_mut(sensor)
            .ok_or_else(|| ThrottleError::UnknownSensor(sensor.to_string()))?;

        if profile.is_empty() || throttling.profiles.contains_key(profile) {
            if state.profile != profile {
                tracing::info!(sensor, profile, "throttling profile switched");
                state.profile = profile.to_string();
            }
        } else {
            tracing::warn!(sensor, profile, "unknown profile, using default map");
            state.profile.clear();
        }
        Ok(())
    }

    /// Resets the sensor's controller state after a fault or sensor
    /// disconnect. Unknown sensors are ignored. Resolved requests and the
    /// sensor's aggregate votes stay in place until the next cycle.
    pub fn clear_throttling(&self, sensor: &str) {
        let mut states = self.states.write().expect("poisoned");
        if let Some(state) = states.get_mut(sensor) {
            state.clear();
            tracing::info!(sensor, "throttling state cleared");
        }
    }

    /// Runs one control cycle for a sensor and returns the cooling devices
    /// whose aggregate request changed, i.e. those hardware must be told
    /// about.
    pub fn run_cycle(
        &self,
        update: &SensorUpdate<'_>,
        snapshot: &PowerSnapshot,
    ) -> Result<Vec<String>, ThrottleError> {
        let config = self.config(update.sensor)?;
        let throttling = config
            .throttling
            .as_ref()
            .ok_or_else(|| ThrottleError::MissingThrottlingConfig(update.sensor.to_string()))?;

        let vote_snapshot: BTreeMap<String, usize> = {
            let votes = self.votes.read().expect("poisoned");
            votes
                .iter()
                .map(|(name, votes)| (name.clone(), votes.max().unwrap_or(0)))
                .collect()
        };

        let mut changes: Vec<(String, usize, usize)> = Vec::new();
        {
            let mut states = self.states.write().expect("poisoned");
            let state = states
                .get_mut(update.sensor)
                .ok_or_else(|| ThrottleError::UnknownSensor(update.sensor.to_string()))?;
            let bound = throttling.bound_cdevs_for(&state.profile);

            if !state.pid_power_budget.is_empty() {
                let ctx = CycleContext {
                    sensor_name: update.sensor,
                    config: &config,
                    throttling,
                    bound,
                    cdevs: &self.cdevs,
                    votes: &vote_snapshot,
                    snapshot,
                    severity: update.severity,
                    temperature: update.temperature,
                    elapsed: update.elapsed,
                    max_throttling: update.max_throttling,
                    predictions: update.predictions,
                };
                let total_power_budget = pid::update_power_budget(&ctx, state);
                match allocator::allocate_power(&ctx, total_power_budget, state) {
                    Ok(()) => allocator::update_requests_by_power(&self.cdevs, state),
                    Err(failure) => {
                        // Fail safe to unthrottled rather than drive devices
                        // from stale budgets.
                        tracing::error!(
                            sensor = update.sensor,
                            error = %failure,
                            "power allocation failed, clearing PID requests"
                        );
                        for request in state.pid_cdev_request.values_mut() {
                            *request = 0;
                        }
                    }
                }
            }

            if !state.hardlimit_cdev_request.is_empty() {
                hardlimit::update_requests_by_severity(bound, update.severity, state);
            }

            if !state.release_step.is_empty() {
                release::update_release_steps(
                    update.sensor,
                    &throttling.bound_cdevs,
                    &self.cdevs,
                    snapshot,
                    update.severity,
                    state,
                );
            }

            self.resolve_requests(update, bound, state, &mut changes);
        }

        // States lock released; publish the vote changes.
        let mut updated = Vec::new();
        let mut votes = self.votes.write().expect("poisoned");
        for (cdev, old, new) in changes {
            let Some(votes) = votes.get_mut(&cdev) else {
                continue;
            };
            if votes.replace(old, new) {
                trace::aggregate_request(&cdev, votes.max().unwrap_or(0));
                updated.push(cdev);
            }
        }
        Ok(updated)
    }

    /// Folds the per-engine requests into the sensor's resolved request per
    /// device, recording every change for vote publication.
    fn resolve_requests(
        &self,
        update: &SensorUpdate<'_>,
        bound: &BTreeMap<String, thermal_types::BoundCdevConfig>,
        state: &mut SensorControlState,
        changes: &mut Vec<(String, usize, usize)>,
    ) {
        let sev = update.severity.as_index();
        let SensorControlState {
            cdev_status,
            pid_cdev_request,
            hardlimit_cdev_request,
            release_step,
            ..
        } = state;

        for (name, status) in cdev_status {
            let (Some(bound_info), Some(cdev)) = (bound.get(name), self.cdevs.get(name)) else {
                continue;
            };
            let pid_request = pid_cdev_request.get(name).copied().unwrap_or(0);
            let hardlimit_request = hardlimit_cdev_request.get(name).copied().unwrap_or(0);
            let release = release_step.get(name).copied().unwrap_or(0);

            let mut request = pid_request.max(hardlimit_request) as i64;
            if release != 0 {
                request = if release >= request {
                    0
                } else {
                    request - release
                };
                // The power-link floor binds only while a release step is
                // active.
                request = request.max(bound_info.cdev_floor_with_power_link[sev] as i64);
            }
            let ceiling = bound_info.cdev_ceiling[sev].min(cdev.max_state());
            let request = request.clamp(0, ceiling as i64) as usize;

            tracing::debug!(
                sensor = update.sensor,
                cdev = name.as_str(),
                pid_request,
                hardlimit_request,
                release,
                request,
                "resolved request"
            );
            if *status != request {
                trace::cdev_request(update.sensor, name, request);
                changes.push((name.clone(), *status, request));
                *status = request;
            }
        }
    }

    /// The most restrictive request over every registered sensor, the value
    /// hardware should run at. `None` for devices no sensor drives.
    pub fn aggregate_request(&self, cdev: &str) -> Option<usize> {
        self.votes.read().expect("poisoned").get(cdev)?.max()
    }

    /// The sensor's current resolved request per device.
    pub fn sensor_requests(
        &self,
        sensor: &str,
    ) -> Result<BTreeMap<String, usize>, ThrottleError> {
        let states = self.states.read().expect("poisoned");
        states
            .get(sensor)
            .map(|state| state.cdev_status.clone())
            .ok_or_else(|| ThrottleError::UnknownSensor(sensor.to_string()))
    }

    fn config(&self, sensor: &str) -> Result<Arc<SensorConfig>, ThrottleError> {
        self.configs
            .read()
            .expect("poisoned")
            .get(sensor)
            .cloned()
            .ok_or_else(|| ThrottleError::UnknownSensor(sensor.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use thermal_types::{BoundCdevConfig, ThrottlingConfig};

    use super::*;

    fn engine_with_one_cdev() -> ThermalThrottling {
        ThermalThrottling::new([CoolingDeviceInfo::new(
            "cpu",
            vec![600.0, 300.0, 0.0],
        )
        .unwrap()])
    }

    fn hardlimit_config() -> SensorConfig {
        let mut throttling = ThrottlingConfig::default();
        throttling.bound_cdevs.insert(
            "cpu".into(),
            BoundCdevConfig {
                limit_info: [0, 0, 0, 1, 2, 2, 2],
                ..Default::default()
            },
        );
        SensorConfig {
            throttling: Some(throttling),
            ..Default::default()
        }
    }

    #[test]
    fn register_rejects_duplicates_and_unknown_cdevs() {
        let engine = engine_with_one_cdev();
        engine.register_sensor("skin", hardlimit_config()).unwrap();
        assert!(matches!(
            engine.register_sensor("skin", hardlimit_config()),
            Err(ThrottleError::DuplicateSensor(_))
        ));

        let mut config = hardlimit_config();
        config
            .throttling
            .as_mut()
            .unwrap()
            .bound_cdevs
            .insert("fan".into(), BoundCdevConfig::default());
        assert!(matches!(
            engine.register_sensor("soc", config),
            Err(ThrottleError::UnknownCoolingDevice { .. })
        ));
    }

    #[test]
    fn register_requires_throttling_config() {
        let engine = engine_with_one_cdev();
        assert!(matches!(
            engine.register_sensor("skin", SensorConfig::default()),
            Err(ThrottleError::MissingThrottlingConfig(_))
        ));
    }

    #[test]
    fn unknown_profile_falls_back_to_default() {
        let engine = engine_with_one_cdev();
        engine.register_sensor("skin", hardlimit_config()).unwrap();
        engine.set_profile("skin", "nonexistent").unwrap();
        let states = engine.states.read().unwrap();
        assert_eq!(states["skin"].profile, "");
    }

    #[test]
    fn clear_is_a_noop_for_unknown_sensor() {
        let engine = engine_with_one_cdev();
        engine.clear_throttling("ghost");
    }
}
