//! PID power-budget computation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use power_telemetry::PowerSnapshot;
use thermal_types::{
    BoundCdevConfig, CoolingDeviceInfo, SensorConfig, Severity, ThrottlingConfig,
};

use crate::state::SensorControlState;
use crate::trace;

/// Everything one control cycle reads: immutable configuration, the cycle's
/// telemetry snapshot and a pre-taken snapshot of the aggregate votes.
pub(crate) struct CycleContext<'a> {
    pub sensor_name: &'a str,
    pub config: &'a SensorConfig,
    pub throttling: &'a ThrottlingConfig,
    /// Profile-resolved bound-device map.
    pub bound: &'a BTreeMap<String, BoundCdevConfig>,
    pub cdevs: &'a HashMap<String, CoolingDeviceInfo>,
    /// Aggregate vote per bound device, snapshotted before the sensor-state
    /// lock is taken so no lock is held across both stores.
    pub votes: &'a BTreeMap<String, usize>,
    pub snapshot: &'a PowerSnapshot,
    pub severity: Severity,
    pub temperature: f64,
    pub elapsed: Duration,
    pub max_throttling: bool,
    pub predictions: &'a [f64],
}

/// Target PID state: the first severity index above the current one with
/// a configured set point, so the controller regulates toward the next
/// threshold. When nothing is configured above, the highest configured
/// index wins.
pub(crate) fn target_state_of_pid(throttling: &ThrottlingConfig, severity: Severity) -> usize {
    let mut target = 0;
    for level in Severity::iter() {
        let state = level.as_index();
        if throttling.s_power[state].is_none() {
            continue;
        }
        target = state;
        if level > severity {
            break;
        }
    }
    tracing::trace!(target, "PID target state");
    target
}

/// One PID cycle: computes the sensor's total power budget and updates the
/// controller state (previous error, integral accumulator, transient
/// blend).
pub(crate) fn update_power_budget(ctx: &CycleContext<'_>, state: &mut SensorControlState) -> f64 {
    if ctx.severity == Severity::None {
        return f64::MAX;
    }

    let throttling = ctx.throttling;
    let sev = ctx.severity.as_index();

    // Wind-up guard inputs: whether every PID-driven device is already
    // pinned at its limit in the relevant direction.
    let mut is_fully_throttle = true;
    let mut is_fully_release = true;
    for (name, bound) in ctx.bound {
        let Some(request) = state.pid_cdev_request.get(name) else {
            continue;
        };
        if *request > bound.limit_info[sev] {
            is_fully_release = false;
        }
        if *request < bound.cdev_ceiling[sev] {
            is_fully_throttle = false;
        }
    }

    let target = target_state_of_pid(throttling, ctx.severity);
    let mut target_changed = false;
    if let Some(prev_target) = state.prev_target {
        if prev_target != target && throttling.tran_cycle > 0 {
            state.tran_cycle = throttling.tran_cycle - 1;
            target_changed = true;
        }
    }
    state.prev_target = Some(target);

    let set_point = ctx.config.hot_thresholds[target];
    let err = set_point - ctx.temperature;

    // Fail-safe: guarantee maximal constriction when asked to throttle as
    // hard as possible and the sensor is at or past its set point.
    if ctx.max_throttling && err <= 0.0 {
        return throttling.min_alloc_power[target];
    }

    // Asymmetric proportional term.
    let p = err
        * if err < 0.0 {
            throttling.k_po[target]
        } else {
            throttling.k_pu[target]
        };

    let mut i = match state.i_budget {
        Some(i) => i,
        None => seed_integral(ctx),
    };

    if err < throttling.i_cutoff[target] {
        if err < 0.0
            && state
                .prev_power_budget
                .is_some_and(|budget| budget > throttling.min_alloc_power[target])
            && !is_fully_throttle
        {
            i += err * throttling.k_io[target];
        } else if err > 0.0
            && state
                .prev_power_budget
                .is_some_and(|budget| budget < throttling.max_alloc_power[target])
            && !is_fully_release
        {
            i += err * throttling.k_iu[target];
        }
    }

    if i.abs() > throttling.i_max[target] {
        i = throttling.i_max[target] * i.signum();
    }
    state.i_budget = Some(i);

    let elapsed_ms = ctx.elapsed.as_millis() as f64;
    let d = match state.prev_err {
        Some(prev_err) if elapsed_ms > 0.0 => {
            throttling.k_d[target] * (err - prev_err) / elapsed_ms
        }
        _ => 0.0,
    };

    let compensation = predictor_compensation(ctx, set_point, target);

    state.prev_err = Some(err);

    let raw = throttling.s_power[target].unwrap_or_default() + p + i + d + compensation;
    let mut power_budget = raw.clamp(
        throttling.min_alloc_power[target],
        throttling.max_alloc_power[target],
    );

    // Blend the discontinuity at a severity-state boundary away linearly
    // over the configured cycle count.
    if target_changed {
        state.budget_transient = state.prev_power_budget.unwrap_or(power_budget) - power_budget;
    }
    let mut budget_transient = 0.0;
    if state.tran_cycle > 0 {
        budget_transient =
            state.budget_transient * (state.tran_cycle as f64 / throttling.tran_cycle as f64);
        power_budget += budget_transient;
        state.tran_cycle -= 1;
    }

    tracing::debug!(
        sensor = ctx.sensor_name,
        power_budget,
        err,
        s_power = throttling.s_power[target].unwrap_or_default(),
        elapsed_ms,
        p,
        i,
        d,
        compensation,
        budget_transient,
        target,
        "PID budget"
    );
    trace::pid_budget(
        ctx.sensor_name,
        power_budget,
        err / ctx.config.multiplier,
        p,
        i,
        d,
        compensation,
        budget_transient,
        target,
    );

    state.prev_power_budget = Some(power_budget);
    power_budget
}

/// Initial integral accumulator: either the configured default or, when a
/// percentage is configured, that share of the summed bound-device power at
/// their current aggregate votes.
fn seed_integral(ctx: &CycleContext<'_>) -> f64 {
    match ctx.throttling.i_default_pct {
        None => ctx.throttling.i_default,
        Some(pct) => {
            let mut total = 0.0;
            for name in ctx.throttling.bound_cdevs.keys() {
                let Some(cdev) = ctx.cdevs.get(name) else {
                    continue;
                };
                let vote = ctx.votes.get(name).copied().unwrap_or(0);
                total += cdev.power_at(vote);
            }
            total * pct / 100.0
        }
    }
}

fn predictor_compensation(ctx: &CycleContext<'_>, set_point: f64, target: usize) -> f64 {
    let Some(predictor) = &ctx.config.predictor else {
        return 0.0;
    };
    let mut compensation = 0.0;
    for (i, prediction) in ctx.predictions.iter().enumerate() {
        let Some(weight) = predictor.prediction_weights.get(i) else {
            break;
        };
        let prediction_err = set_point - prediction * ctx.config.multiplier;
        compensation += weight * prediction_err;
    }
    compensation * predictor.k_p_compensate[target]
}
