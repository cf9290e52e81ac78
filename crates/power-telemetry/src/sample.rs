use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::TelemetryError;

/// One energy-meter reading: an accumulated energy counter paired with the
/// meter's elapsed-time counter. Both are expected to be monotonically
/// increasing across readings of the same rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnergySample {
    /// Accumulated energy, in microwatt-seconds.
    pub energy_uws: u64,
    /// Meter elapsed time, in milliseconds.
    pub duration_ms: u64,
}

/// Average power in mW between two samples of `rail`.
///
/// Returns `Ok(None)` when the two samples cover no elapsed time (fewer
/// than two distinct readings collected so far). A counter or duration
/// regression yields [`TelemetryError::InvalidSample`]; the caller keeps
/// its previous history so the next valid pair recovers automatically.
pub fn average_power(
    rail: &str,
    last: EnergySample,
    curr: EnergySample,
) -> Result<Option<f64>, TelemetryError> {
    if curr.duration_ms == last.duration_ms {
        tracing::debug!(rail, "has not collected min 2 samples yet");
        return Ok(None);
    }
    if curr.duration_ms < last.duration_ms || curr.energy_uws < last.energy_uws {
        return Err(TelemetryError::InvalidSample {
            rail: rail.to_string(),
            last_energy: last.energy_uws,
            last_duration: last.duration_ms,
            curr_energy: curr.energy_uws,
            curr_duration: curr.duration_ms,
        });
    }
    let duration = curr.duration_ms - last.duration_ms;
    let delta_energy = curr.energy_uws - last.energy_uws;
    let avg_power = delta_energy as f64 / duration as f64;
    tracing::trace!(rail, avg_power, duration, delta_energy, "rail average power");
    Ok(Some(avg_power))
}

/// Parse one energy-meter line.
///
/// Format example: `CH3(T=358356)[S2M_VDD_CPUCL2], 761330`
pub fn parse_energy_line(line: &str) -> Option<(String, EnergySample)> {
    let t_start = line.find("T=")?;
    let t_end = line.find(')')?;
    let duration_ms = line.get(t_start + 2..t_end)?.parse().ok()?;

    let rail_start = line.find(")[")?;
    let rail_end = line.find(']')?;
    let rail = line.get(rail_start + 2..rail_end)?.to_string();

    let energy_start = line.find("],")?;
    let energy_uws = line.get(energy_start + 2..)?.trim().parse().ok()?;

    Some((
        rail,
        EnergySample {
            energy_uws,
            duration_ms,
        },
    ))
}

/// Parse a whole energy-meter dump, one rail per line. Malformed lines are
/// skipped; a repeated rail keeps the last reading.
pub fn parse_energy_dump(content: &str) -> HashMap<String, EnergySample> {
    content
        .lines()
        .filter_map(parse_energy_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_energy_line() {
        let (rail, sample) = parse_energy_line("CH3(T=358356)[S2M_VDD_CPUCL2], 761330").unwrap();
        assert_eq!(rail, "S2M_VDD_CPUCL2");
        assert_eq!(
            sample,
            EnergySample {
                energy_uws: 761330,
                duration_ms: 358356
            }
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_energy_line("").is_none());
        assert!(parse_energy_line("CH3(T=)[RAIL], 10").is_none());
        assert!(parse_energy_line("CH3(T=100)[RAIL] 10").is_none());
        assert!(parse_energy_line("CH3(T=100)[RAIL], ten").is_none());
    }

    #[test]
    fn dump_skips_bad_lines() {
        let dump = "CH0(T=100)[VDD_A], 500\nnot a rail\nCH1(T=100)[VDD_B], 700\n";
        let samples = parse_energy_dump(dump);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples["VDD_B"].energy_uws, 700);
    }

    #[test]
    fn average_power_needs_two_distinct_samples() {
        let sample = EnergySample {
            energy_uws: 100,
            duration_ms: 50,
        };
        assert_eq!(average_power("VDD_A", sample, sample), Ok(None));
    }

    #[test]
    fn average_power_is_delta_energy_over_delta_time() {
        let last = EnergySample {
            energy_uws: 1000,
            duration_ms: 100,
        };
        let curr = EnergySample {
            energy_uws: 1600,
            duration_ms: 400,
        };
        assert_eq!(average_power("VDD_A", last, curr), Ok(Some(2.0)));
    }

    #[test]
    fn counter_regression_is_invalid() {
        let last = EnergySample {
            energy_uws: 1000,
            duration_ms: 100,
        };
        let curr = EnergySample {
            energy_uws: 900,
            duration_ms: 200,
        };
        assert!(matches!(
            average_power("VDD_A", last, curr),
            Err(TelemetryError::InvalidSample { .. })
        ));

        let backwards = EnergySample {
            energy_uws: 2000,
            duration_ms: 50,
        };
        assert!(average_power("VDD_A", last, backwards).is_err());
    }
}
