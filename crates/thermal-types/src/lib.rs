//! Shared thermal type definitions
//!
//! This crate contains the immutable data model shared across the thermal
//! management components: the ordered severity scale, cooling-device state
//! tables, and the per-sensor throttling configuration consumed by the
//! control core.

mod cdev;
mod sensor;
mod severity;

pub use cdev::CoolingDeviceInfo;
pub use sensor::{
    BoundCdevConfig, PredictorConfig, ReleaseLogic, SensorConfig, ThrottlingConfig,
};
pub use severity::{PerSeverity, Severity};

use thiserror::Error;

/// Validation and parsing failures for the thermal data model.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cooling device `{0}` has an empty state2power table")]
    EmptyStateTable(String),

    #[error("cooling device `{cdev}` state2power rises at state {state}")]
    RisingStateTable { cdev: String, state: usize },

    #[error("cooling device `{cdev}` state2power[{state}] is not finite")]
    NonFiniteStatePower { cdev: String, state: usize },

    #[error("failed to parse sensor config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
