//! Power-rail telemetry provider.
//!
//! Maintains, per named power rail, a monotonically increasing
//! (energy, elapsed-time) counter pair and derives an average-power
//! estimate over a configurable sample window. Virtual rails combine
//! several physical rails through a configurable formula. Consumers read
//! a [`PowerSnapshot`], immutable for the duration of one control cycle.

mod provider;
mod rail;
mod sample;

pub use provider::{PowerSnapshot, PowerTelemetry, RailPower};
pub use rail::{Formula, RailConfig, VirtualRailConfig};
pub use sample::{average_power, parse_energy_dump, parse_energy_line, EnergySample};

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TelemetryError {
    /// The energy counter or its duration moved backward. The offending
    /// average-power computation is discarded for the cycle and corrected
    /// automatically on the next valid sample pair.
    #[error(
        "power rail `{rail}` sample regressed: \
         last={last_energy}(T={last_duration}) curr={curr_energy}(T={curr_duration})"
    )]
    InvalidSample {
        rail: String,
        last_energy: u64,
        last_duration: u64,
        curr_energy: u64,
        curr_duration: u64,
    },

    /// A rail (or a virtual rail's linked rail) has no energy source.
    #[error("could not find energy source `{0}`")]
    UnknownEnergySource(String),

    /// A virtual rail's coefficient table does not match its linked rails.
    #[error("virtual rail `{0}` has mismatched linked_rails/coefficients")]
    MalformedVirtualRail(String),
}
