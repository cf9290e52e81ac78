//! Throttling-decision engine for the thermal management service.
//!
//! Given periodic temperature readings and a configured severity level per
//! sensor, computes how hard each bound cooling device should be driven:
//! a PID power-budget controller feeds a power-based allocator driven by
//! live power-rail telemetry, a severity-table hard-limit allocator and a
//! release/hysteresis engine produce competing requests, and a cross-sensor
//! aggregator reduces every sensor's vote per device into the single value
//! driving hardware.

mod aggregator;
mod allocator;
mod engine;
mod error;
mod hardlimit;
pub mod logging;
mod pid;
mod release;
mod state;
mod trace;

pub use engine::{SensorUpdate, ThermalThrottling};
pub use error::ThrottleError;
