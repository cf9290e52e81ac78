//! Power-based budget allocation.
//!
//! Splits the sensor's total PID budget across its weighted cooling devices
//! and folds in measured rail power so that devices drawing less than their
//! share donate the surplus to the rest. Runs in two passes over one vote
//! snapshot: pass one withdraws already-idle devices from the pool, pass
//! two distributes what remains and applies per-cycle step limits.

use std::collections::BTreeSet;

use crate::error::AllocationFailure;
use crate::pid::CycleContext;
use crate::state::SensorControlState;
use crate::trace;

/// Distributes `total_power_budget` over the sensor's PID-driven devices,
/// writing the per-device budget into `state.pid_power_budget`.
pub(crate) fn allocate_power(
    ctx: &CycleContext<'_>,
    mut total_power_budget: f64,
    state: &mut SensorControlState,
) -> Result<(), AllocationFailure> {
    let sev = ctx.severity.as_index();

    if !ctx.throttling.excluded_power.is_empty() {
        total_power_budget -= excluded_power(ctx, sev);
        total_power_budget = total_power_budget.max(0.0);
        tracing::debug!(
            sensor = ctx.sensor_name,
            total_power_budget,
            "budget after excluded rails"
        );
    }

    // Devices outside the proportional pool: zero or absent weight.
    let mut allocated: BTreeSet<&str> = BTreeSet::new();
    let mut total_weight = 0.0;
    for (name, config) in ctx.bound {
        if !config.enabled {
            continue;
        }
        match config.cdev_weight_for_pid[sev] {
            Some(weight) if weight > 0.0 => total_weight += weight,
            _ => {
                allocated.insert(name);
            }
        }
    }

    // Telemetry validation up front so the outcome does not depend on map
    // iteration order. A power-linked device without usable data fails the
    // whole cycle; anything else downgrades to weight-only distribution.
    let mut power_data_invalid = false;
    for (name, config) in ctx.bound {
        if !config.enabled || allocated.contains(name.as_str()) {
            continue;
        }
        let avg = config
            .power_rail
            .as_deref()
            .and_then(|rail| ctx.snapshot.avg_power(rail));
        if avg.is_none() {
            if config.throttling_with_power_link {
                return Err(AllocationFailure::MissingPowerLink {
                    cdev: name.clone(),
                    rail: config.power_rail.clone().unwrap_or_default(),
                });
            }
            power_data_invalid = true;
        }
    }

    let measured = |config: &thermal_types::BoundCdevConfig| -> f64 {
        config
            .power_rail
            .as_deref()
            .and_then(|rail| ctx.snapshot.avg_power(rail))
            .unwrap_or(f64::NAN)
    };

    // Pass one: devices already unthrottled and drawing under their share
    // keep their measured power and leave the pool.
    if !power_data_invalid {
        let mut allocated_power = 0.0;
        let mut allocated_weight = 0.0;
        for (name, config) in ctx.bound {
            if !config.enabled || allocated.contains(name.as_str()) {
                continue;
            }
            let Some(weight) = config.cdev_weight_for_pid[sev].filter(|w| *w > 0.0) else {
                continue;
            };
            let Some(request) = state.pid_cdev_request.get(name) else {
                continue;
            };
            let avg = measured(config);
            let share = total_power_budget * (weight / total_weight);
            if share - avg > 0.0 && *request == 0 {
                allocated_power += avg;
                allocated_weight += weight;
                allocated.insert(name);
                tracing::trace!(
                    sensor = ctx.sensor_name,
                    cdev = name.as_str(),
                    avg,
                    "device idle below its share, withdrawn from pool"
                );
            }
        }
        total_power_budget -= allocated_power;
        total_weight -= allocated_weight;
    }

    // Pass two: distribute the remaining budget.
    for (name, config) in ctx.bound {
        if allocated.contains(name.as_str()) {
            continue;
        }
        let Some(cdev) = ctx.cdevs.get(name) else {
            continue;
        };
        if !config.enabled {
            if state.pid_power_budget.contains_key(name) {
                state
                    .pid_power_budget
                    .insert(name.clone(), cdev.power_at(0));
            }
            continue;
        }
        let Some(weight) = config.cdev_weight_for_pid[sev].filter(|w| *w > 0.0) else {
            continue;
        };
        let Some(curr_budget) = state.pid_power_budget.get(name).copied() else {
            continue;
        };
        let curr_vote = state.pid_cdev_request.get(name).copied().unwrap_or(0);

        // Surplus (positive) or deficit (negative) of this device's share
        // over its measured draw. Unknown when telemetry is invalid.
        let adjustment = if power_data_invalid {
            None
        } else {
            let avg = measured(config);
            let adj = total_power_budget * (weight / total_weight) - avg;
            // A deficit cannot be taken from a device already pinned at its
            // deepest state.
            if adj < 0.0 && curr_vote == cdev.max_state() {
                continue;
            }
            Some((adj, avg))
        };

        let mut budget = match adjustment {
            Some((adj, avg)) if avg > curr_budget => curr_budget + adj * (curr_budget / avg),
            Some((adj, _)) => curr_budget + adj,
            None => total_power_budget * (weight / total_weight),
        };
        budget = budget.clamp(0.0, cdev.power_at(0));

        let Some(max_vote) = ctx.votes.get(name).copied() else {
            return Err(AllocationFailure::UnknownVote { cdev: name.clone() });
        };

        if !ctx.max_throttling {
            budget = limit_steps(
                config,
                cdev,
                sev,
                curr_vote,
                max_vote,
                adjustment.map(|(adj, _)| adj),
                budget,
            );
        }

        tracing::debug!(
            sensor = ctx.sensor_name,
            cdev = name.as_str(),
            budget,
            weight,
            "allocated device budget"
        );
        trace::cdev_budget(ctx.sensor_name, name, budget);
        state.pid_power_budget.insert(name.clone(), budget);
    }

    Ok(())
}

/// Bounds how far a device may move in one cycle. Plateaus in the power
/// table are skipped so a step always changes the granted power.
fn limit_steps(
    config: &thermal_types::BoundCdevConfig,
    cdev: &thermal_types::CoolingDeviceInfo,
    sev: usize,
    curr_vote: usize,
    max_vote: usize,
    adjustment: Option<f64>,
    mut budget: f64,
) -> f64 {
    let invalid = adjustment.is_none();

    if let Some(max_release_step) = config.max_release_step {
        if invalid || adjustment.is_some_and(|adj| adj > 0.0) {
            if !invalid && curr_vote < max_vote {
                // Another sensor holds the aggregate; no room to release.
                budget = cdev.power_at(curr_vote);
            } else {
                let limit = config.limit_info[sev] as i64;
                let curr = curr_vote as i64;
                let mut step = max_release_step as i64;
                while curr - step > limit
                    && cdev.power_at((curr - step) as usize) == cdev.power_at(curr_vote)
                {
                    step += 1;
                }
                let target = (curr - step).max(0) as usize;
                budget = budget.min(cdev.power_at(target));
            }
        }
    }

    if let Some(max_throttle_step) = config.max_throttle_step {
        if invalid || adjustment.is_some_and(|adj| adj < 0.0) {
            let ceiling = config.cdev_ceiling[sev].min(cdev.max_state());
            let mut step = max_throttle_step;
            while curr_vote + step < ceiling
                && cdev.power_at(curr_vote + step) == cdev.power_at(curr_vote)
            {
                step += 1;
            }
            let target = (curr_vote + step).min(ceiling);
            budget = budget.max(cdev.power_at(target));
        }
    }

    budget
}

/// Quantizes each device's power budget to a state request: the shallowest
/// state whose granted power fits the budget, the deepest state otherwise.
pub(crate) fn update_requests_by_power(
    cdevs: &std::collections::HashMap<String, thermal_types::CoolingDeviceInfo>,
    state: &mut SensorControlState,
) {
    let SensorControlState {
        pid_power_budget,
        pid_cdev_request,
        ..
    } = state;
    for (name, budget) in pid_power_budget {
        let Some(cdev) = cdevs.get(name) else {
            continue;
        };
        let table = cdev.state2power();
        let mut request = table.len() - 1;
        for (i, power) in table[..table.len() - 1].iter().enumerate() {
            if *budget >= *power {
                request = i;
                break;
            }
        }
        pid_cdev_request.insert(name.clone(), request);
    }
}

fn excluded_power(ctx: &CycleContext<'_>, sev: usize) -> f64 {
    let mut excluded = 0.0;
    for (rail, weights) in &ctx.throttling.excluded_power {
        let Some(avg) = ctx.snapshot.avg_power(rail) else {
            continue;
        };
        if avg > 0.0 {
            excluded += avg * weights[sev];
            trace::rail_power(ctx.sensor_name, rail, avg);
        }
    }
    excluded
}
