//! Metrics emission.
//!
//! Every sample is a `tracing` event under the `metrics.thermal` target
//! with `tag_`-prefixed identity fields, so a metrics layer can split tags
//! from values without parsing message text. With no such layer installed
//! the events cost one enabled-check.

const TARGET: &str = "metrics.thermal";

#[allow(clippy::too_many_arguments)]
pub(crate) fn pid_budget(
    sensor: &str,
    power_budget: f64,
    err: f64,
    p: f64,
    i: f64,
    d: f64,
    compensation: f64,
    budget_transient: f64,
    target_state: usize,
) {
    tracing::info!(
        target: TARGET,
        tag_sensor = sensor,
        power_budget,
        err,
        p,
        i,
        d,
        compensation,
        budget_transient,
        target_state,
        "pid"
    );
}

pub(crate) fn cdev_budget(sensor: &str, cdev: &str, budget: f64) {
    tracing::info!(
        target: TARGET,
        tag_sensor = sensor,
        tag_cdev = cdev,
        budget,
        "cdev_budget"
    );
}

pub(crate) fn rail_power(sensor: &str, rail: &str, avg_power: f64) {
    tracing::info!(
        target: TARGET,
        tag_sensor = sensor,
        tag_rail = rail,
        avg_power,
        "rail_power"
    );
}

pub(crate) fn release_check(sensor: &str, rail: &str, power_threshold: f64, avg_power: f64) {
    tracing::info!(
        target: TARGET,
        tag_sensor = sensor,
        tag_rail = rail,
        power_threshold,
        avg_power,
        "release_check"
    );
}

pub(crate) fn cdev_request(sensor: &str, cdev: &str, request: usize) {
    tracing::info!(
        target: TARGET,
        tag_sensor = sensor,
        tag_cdev = cdev,
        request,
        "cdev_request"
    );
}

pub(crate) fn aggregate_request(cdev: &str, request: usize) {
    tracing::info!(
        target: TARGET,
        tag_cdev = cdev,
        request,
        "aggregate_request"
    );
}
