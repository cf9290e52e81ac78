use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// A cooling device: an actuator with an ordered list of discrete states,
/// each with an associated power draw in mW. State 0 is unthrottled and the
/// table is monotonically non-increasing with state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingDeviceInfo {
    name: String,
    state2power: Vec<f64>,
    max_state: usize,
}

impl CoolingDeviceInfo {
    pub fn new(name: impl Into<String>, state2power: Vec<f64>) -> Result<Self, ConfigError> {
        let name = name.into();
        if state2power.is_empty() {
            return Err(ConfigError::EmptyStateTable(name));
        }
        for (state, power) in state2power.iter().enumerate() {
            if !power.is_finite() {
                return Err(ConfigError::NonFiniteStatePower { cdev: name.clone(), state });
            }
            if state > 0 && *power > state2power[state - 1] {
                return Err(ConfigError::RisingStateTable { cdev: name.clone(), state });
            }
        }
        let max_state = state2power.len() - 1;
        Ok(Self {
            name,
            state2power,
            max_state,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest valid state index.
    pub fn max_state(&self) -> usize {
        self.max_state
    }

    /// Power draw at `state`, clamped to the deepest state.
    pub fn power_at(&self, state: usize) -> f64 {
        self.state2power[state.min(self.max_state)]
    }

    pub fn state2power(&self) -> &[f64] {
        &self.state2power
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_non_increasing_table() {
        let cdev = CoolingDeviceInfo::new("cpu", vec![1000.0, 800.0, 500.0, 200.0, 0.0]).unwrap();
        assert_eq!(cdev.max_state(), 4);
        assert_eq!(cdev.power_at(2), 500.0);
        // Out-of-range states clamp to the deepest entry.
        assert_eq!(cdev.power_at(100), 0.0);
    }

    #[test]
    fn accepts_plateaus() {
        assert!(CoolingDeviceInfo::new("gpu", vec![500.0, 500.0, 200.0]).is_ok());
    }

    #[test]
    fn rejects_rising_table() {
        let err = CoolingDeviceInfo::new("cpu", vec![500.0, 800.0]).unwrap_err();
        assert!(matches!(err, ConfigError::RisingStateTable { state: 1, .. }));
    }

    #[test]
    fn rejects_empty_and_non_finite_tables() {
        assert!(matches!(
            CoolingDeviceInfo::new("cpu", vec![]),
            Err(ConfigError::EmptyStateTable(_))
        ));
        assert!(matches!(
            CoolingDeviceInfo::new("cpu", vec![f64::NAN]),
            Err(ConfigError::NonFiniteStatePower { state: 0, .. })
        ));
    }
}
