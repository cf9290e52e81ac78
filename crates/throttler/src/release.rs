//! Power-rail release hysteresis.
//!
//! Per bound device with a release threshold, compares the rail's averaged
//! power against the threshold for the current severity and ramps a
//! per-device release step according to the configured policy. The step is
//! subtracted from the resolved request later, so a positive step releases
//! throttling and a negative one adds headroom.

use std::collections::{BTreeMap, HashMap};

use power_telemetry::PowerSnapshot;
use thermal_types::{BoundCdevConfig, CoolingDeviceInfo, ReleaseLogic, Severity};

use crate::state::SensorControlState;
use crate::trace;

pub(crate) fn update_release_steps(
    sensor_name: &str,
    bound: &BTreeMap<String, BoundCdevConfig>,
    cdevs: &HashMap<String, CoolingDeviceInfo>,
    snapshot: &PowerSnapshot,
    severity: Severity,
    state: &mut SensorControlState,
) {
    let sev = severity.as_index();
    for (name, step) in &mut state.release_step {
        let (Some(config), Some(cdev)) = (bound.get(name), cdevs.get(name)) else {
            continue;
        };
        let max_state = cdev.max_state() as i64;

        let avg_power = config
            .power_rail
            .as_deref()
            .and_then(|rail| snapshot.avg_power(rail));
        let avg_power = match avg_power {
            Some(power) if power >= 0.0 => power,
            // No usable telemetry: power-linked devices pin fully released
            // so the floor-with-power-link clamp takes over.
            _ => {
                *step = if config.throttling_with_power_link {
                    max_state
                } else {
                    0
                };
                continue;
            }
        };

        let threshold = config.power_thresholds[sev];
        let mut is_over_budget = true;
        if let Some(threshold) = threshold {
            let under = if config.high_power_check {
                avg_power > threshold
            } else {
                avg_power < threshold
            };
            if under {
                is_over_budget = false;
            }
        }
        tracing::debug!(
            sensor = sensor_name,
            cdev = name.as_str(),
            rail = config.power_rail.as_deref().unwrap_or(""),
            threshold = threshold.unwrap_or(f64::NAN),
            avg_power,
            is_over_budget,
            "release check"
        );
        trace::release_check(
            sensor_name,
            config.power_rail.as_deref().unwrap_or(""),
            threshold.unwrap_or(f64::NAN),
            avg_power,
        );

        match config.release_logic {
            ReleaseLogic::Increase => {
                if is_over_budget {
                    *step = 0;
                } else if step.abs() < max_state {
                    *step -= 1;
                }
            }
            ReleaseLogic::Decrease => {
                if is_over_budget {
                    *step = 0;
                } else if *step < max_state {
                    *step += 1;
                }
            }
            ReleaseLogic::Stepwise => {
                if is_over_budget {
                    if step.abs() < max_state {
                        *step -= 1;
                    }
                } else if *step < max_state {
                    *step += 1;
                }
            }
            ReleaseLogic::ReleaseToFloor => {
                *step = if is_over_budget { 0 } else { max_state };
            }
            ReleaseLogic::None => {}
        }
    }
}
