use derive_more::Display;
use thiserror::Error;

/// Registration and lookup failures. Fatal to the operation that raised
/// them, never to the process.
#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("sensor `{0}` throttling state has already been registered")]
    DuplicateSensor(String),

    #[error("sensor `{0}` has no throttling config")]
    MissingThrottlingConfig(String),

    #[error("sensor `{sensor}` is bound to unknown cooling device `{cdev}`")]
    UnknownCoolingDevice { sensor: String, cdev: String },

    #[error("sensor `{0}` is not registered")]
    UnknownSensor(String),
}

/// Why a PID allocation cycle could not complete. The engine reacts by
/// zeroing every PID-driven request of the sensor (fail-safe to
/// unthrottled) and carrying on.
#[derive(Debug, Display, PartialEq, Eq)]
pub(crate) enum AllocationFailure {
    /// A device throttled with a power link has no usable telemetry.
    #[display("cooling device `{cdev}` requires telemetry on rail `{rail}`")]
    MissingPowerLink { cdev: String, rail: String },

    /// A bound device is missing from the aggregate-request store.
    #[display("cooling device `{cdev}` not present in aggregate request store")]
    UnknownVote { cdev: String },
}

impl core::error::Error for AllocationFailure {}
