use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::rail::{Formula, RailConfig};
use crate::sample::{average_power, EnergySample};
use crate::TelemetryError;

/// Last computed average power of one rail.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RailPower {
    /// `None` while the rail is still collecting samples or after an
    /// invalid sample pair.
    pub avg_power_mw: Option<f64>,
    pub last_update_ms: Option<u64>,
}

/// Read-only view of every registered rail's average power, taken once per
/// control cycle so allocator decisions stay internally consistent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerSnapshot {
    rails: BTreeMap<String, RailPower>,
}

impl PowerSnapshot {
    pub fn avg_power(&self, rail: &str) -> Option<f64> {
        self.rails.get(rail).and_then(|r| r.avg_power_mw)
    }

    pub fn contains_rail(&self, rail: &str) -> bool {
        self.rails.contains_key(rail)
    }

    pub fn rails(&self) -> impl Iterator<Item = (&str, RailPower)> {
        self.rails.iter().map(|(name, power)| (name.as_str(), *power))
    }

    pub fn len(&self) -> usize {
        self.rails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rails.is_empty()
    }
}

impl FromIterator<(String, Option<f64>)> for PowerSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, Option<f64>)>>(iter: T) -> Self {
        Self {
            rails: iter
                .into_iter()
                .map(|(rail, avg_power_mw)| {
                    (
                        rail,
                        RailPower {
                            avg_power_mw,
                            last_update_ms: None,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
struct RailStatus {
    /// One sample window per underlying energy source (one for plain rails,
    /// one per linked rail for virtual rails). The front is the oldest
    /// sample, so the average spans `power_sample_count` refreshes.
    histories: Vec<VecDeque<EnergySample>>,
    last_update_ms: Option<u64>,
    avg_power_mw: Option<f64>,
}

/// Per-rail average-power bookkeeping over raw energy-counter readings.
///
/// The caller feeds freshly read samples through [`PowerTelemetry::refresh`]
/// and hands the resulting [`PowerSnapshot`] to the throttling core.
#[derive(Debug)]
pub struct PowerTelemetry {
    rails: BTreeMap<String, RailConfig>,
    status: BTreeMap<String, RailStatus>,
    energy: HashMap<String, EnergySample>,
    prev_log_energy: HashMap<String, EnergySample>,
}

impl PowerTelemetry {
    /// Registers `rails` against an initial set of energy readings. Every
    /// plain rail (and every linked rail of a virtual rail) must have an
    /// energy source; windows are seeded with the initial reading so the
    /// first averages appear after one full window.
    pub fn new(
        rails: BTreeMap<String, RailConfig>,
        initial: &HashMap<String, EnergySample>,
    ) -> Result<Self, TelemetryError> {
        let mut status = BTreeMap::new();

        for (name, config) in &rails {
            if config.power_sample_count == 0 {
                tracing::info!(rail = %name, "rail disabled, sample count is zero");
                continue;
            }

            let sources: Vec<&str> = match &config.virtual_rail {
                Some(virtual_rail) => {
                    if virtual_rail.linked_rails.len() != virtual_rail.coefficients.len() {
                        return Err(TelemetryError::MalformedVirtualRail(name.clone()));
                    }
                    virtual_rail.linked_rails.iter().map(String::as_str).collect()
                }
                None => vec![name.as_str()],
            };

            let mut histories = Vec::with_capacity(sources.len());
            for source in sources {
                let seed = *initial
                    .get(source)
                    .ok_or_else(|| TelemetryError::UnknownEnergySource(source.to_string()))?;
                histories.push(VecDeque::from(vec![seed; config.power_sample_count]));
            }

            status.insert(
                name.clone(),
                RailStatus {
                    histories,
                    last_update_ms: None,
                    avg_power_mw: None,
                },
            );
            tracing::info!(rail = %name, "registered power rail");
        }

        Ok(Self {
            rails,
            status,
            energy: initial.clone(),
            prev_log_energy: initial.clone(),
        })
    }

    /// Ingests a new batch of energy readings and recomputes every rail
    /// whose sample delay has elapsed.
    pub fn refresh(&mut self, samples: &HashMap<String, EnergySample>, now_ms: u64) {
        self.energy
            .extend(samples.iter().map(|(rail, sample)| (rail.clone(), *sample)));

        let Self {
            rails,
            status,
            energy,
            ..
        } = self;

        for (name, rail_status) in status.iter_mut() {
            let Some(config) = rails.get(name) else {
                continue;
            };
            if let Some(last) = rail_status.last_update_ms {
                if now_ms.saturating_sub(last) < config.power_sample_delay_ms {
                    continue;
                }
            }

            let avg = match &config.virtual_rail {
                None => advance_window(name, energy, &mut rail_status.histories[0]),
                Some(virtual_rail) => {
                    let mut contributions = Vec::with_capacity(virtual_rail.linked_rails.len());
                    for (i, linked) in virtual_rail.linked_rails.iter().enumerate() {
                        let avg = advance_window(linked, energy, &mut rail_status.histories[i]);
                        contributions.push((avg, virtual_rail.coefficients[i]));
                    }
                    combine_virtual(virtual_rail.formula, &contributions, virtual_rail.offset)
                }
            };

            rail_status.avg_power_mw = avg.filter(|power| *power >= 0.0);
            rail_status.last_update_ms = Some(now_ms);
        }
    }

    pub fn snapshot(&self) -> PowerSnapshot {
        PowerSnapshot {
            rails: self
                .status
                .iter()
                .map(|(name, status)| {
                    (
                        name.clone(),
                        RailPower {
                            avg_power_mw: status.avg_power_mw,
                            last_update_ms: status.last_update_ms,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Logs average power per rail since the previous call, plus the total.
    pub fn log_power_status(&mut self) {
        let mut total_power = 0.0;
        let mut max_duration = 0u64;
        let mut logged = 0u32;

        for (rail, curr) in &self.energy {
            let Some(last) = self.prev_log_energy.get(rail) else {
                continue;
            };
            match average_power(rail, *last, *curr) {
                Ok(Some(avg_power)) => {
                    tracing::info!(rail = %rail, avg_power_mw = avg_power, "rail power");
                    total_power += avg_power;
                    max_duration = max_duration.max(curr.duration_ms - last.duration_ms);
                    logged += 1;
                }
                Ok(None) => {}
                Err(err) => tracing::error!(rail = %rail, %err, "skipping rail in power log"),
            }
        }

        if logged > 0 {
            tracing::info!(
                total_power_mw = total_power,
                duration_ms = max_duration,
                "power rails total"
            );
        }
        self.prev_log_energy = self.energy.clone();
    }
}

/// Computes the window average for one energy source and slides the window
/// forward. Regressed samples leave the window untouched so the next valid
/// reading recovers.
fn advance_window(
    rail: &str,
    energy: &HashMap<String, EnergySample>,
    history: &mut VecDeque<EnergySample>,
) -> Option<f64> {
    let Some(curr) = energy.get(rail).copied() else {
        tracing::error!(rail, "could not find power rail energy source");
        return None;
    };
    let last = history.front().copied()?;
    match average_power(rail, last, curr) {
        Ok(avg) => {
            history.pop_front();
            history.push_back(curr);
            avg
        }
        Err(err) => {
            tracing::error!(rail, %err, "discarding invalid sample pair");
            None
        }
    }
}

fn combine_virtual(formula: Formula, contributions: &[(Option<f64>, f64)], offset: f64) -> Option<f64> {
    let mut value = match formula {
        Formula::CountThreshold => {
            let count = contributions
                .iter()
                .filter(|(avg, coefficient)| match avg {
                    Some(avg) if *coefficient < 0.0 => *avg < -coefficient,
                    Some(avg) => *avg >= *coefficient,
                    None => false,
                })
                .count();
            count as f64
        }
        Formula::WeightedAvg => {
            let mut sum = 0.0;
            for (avg, coefficient) in contributions {
                sum += (*avg)? * coefficient;
            }
            sum
        }
        Formula::Maximum => contributions
            .iter()
            .filter_map(|(avg, coefficient)| avg.map(|a| a * coefficient))
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            })?,
        Formula::Minimum => contributions
            .iter()
            .filter_map(|(avg, coefficient)| avg.map(|a| a * coefficient))
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.min(v)))
            })?,
    };

    if value >= 0.0 {
        value += offset;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::rail::VirtualRailConfig;

    fn sample(energy_uws: u64, duration_ms: u64) -> EnergySample {
        EnergySample {
            energy_uws,
            duration_ms,
        }
    }

    fn plain_rail(count: usize, delay: u64) -> RailConfig {
        RailConfig {
            power_sample_count: count,
            power_sample_delay_ms: delay,
            virtual_rail: None,
        }
    }

    fn single(rail: &str, s: EnergySample) -> HashMap<String, EnergySample> {
        HashMap::from([(rail.to_string(), s)])
    }

    #[test_log::test]
    fn registration_requires_energy_source() {
        let rails = BTreeMap::from([("VDD_A".to_string(), plain_rail(2, 0))]);
        let err = PowerTelemetry::new(rails, &HashMap::new()).unwrap_err();
        assert_eq!(err, TelemetryError::UnknownEnergySource("VDD_A".into()));
    }

    #[test_log::test]
    fn average_spans_the_sample_window() {
        let rails = BTreeMap::from([("VDD_A".to_string(), plain_rail(2, 0))]);
        let mut telemetry = PowerTelemetry::new(rails, &single("VDD_A", sample(0, 0))).unwrap();

        // Window of 2: the first refresh compares against the seeded sample,
        // the second against the sample from two refreshes ago.
        telemetry.refresh(&single("VDD_A", sample(100, 100)), 100);
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), Some(1.0));

        telemetry.refresh(&single("VDD_A", sample(500, 200)), 200);
        // (500 - 0) / (200 - 0): still against the seed, window length 2.
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), Some(2.5));

        telemetry.refresh(&single("VDD_A", sample(900, 300)), 300);
        // (900 - 100) / (300 - 100)
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), Some(4.0));
    }

    #[test_log::test]
    fn sample_delay_keeps_previous_average() {
        let rails = BTreeMap::from([("VDD_A".to_string(), plain_rail(1, 1000))]);
        let mut telemetry = PowerTelemetry::new(rails, &single("VDD_A", sample(0, 0))).unwrap();

        telemetry.refresh(&single("VDD_A", sample(200, 100)), 100);
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), Some(2.0));

        // Too soon: the new reading is stored but the average is not
        // recomputed.
        telemetry.refresh(&single("VDD_A", sample(10_000, 200)), 200);
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), Some(2.0));

        telemetry.refresh(&single("VDD_A", sample(10_000, 1200)), 1200);
        assert_eq!(
            telemetry.snapshot().avg_power("VDD_A"),
            Some((10_000.0 - 200.0) / (1200.0 - 100.0))
        );
    }

    #[test_log::test]
    fn regression_yields_unavailable_then_recovers() {
        let rails = BTreeMap::from([("VDD_A".to_string(), plain_rail(1, 0))]);
        let mut telemetry = PowerTelemetry::new(rails, &single("VDD_A", sample(1000, 100))).unwrap();

        // Counter moved backward: discarded, rail unavailable.
        telemetry.refresh(&single("VDD_A", sample(500, 200)), 200);
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), None);

        // Next valid pair is computed against the untouched window.
        telemetry.refresh(&single("VDD_A", sample(1400, 300)), 300);
        assert_eq!(telemetry.snapshot().avg_power("VDD_A"), Some(2.0));
    }

    #[test_log::test]
    fn weighted_avg_virtual_rail() {
        let rails = BTreeMap::from([
            ("VDD_A".to_string(), plain_rail(1, 0)),
            (
                "VDD_SUM".to_string(),
                RailConfig {
                    power_sample_count: 1,
                    power_sample_delay_ms: 0,
                    virtual_rail: Some(VirtualRailConfig {
                        linked_rails: vec!["VDD_A".into(), "VDD_B".into()],
                        coefficients: vec![1.0, 2.0],
                        offset: 0.5,
                        formula: Formula::WeightedAvg,
                    }),
                },
            ),
        ]);
        let initial = HashMap::from([
            ("VDD_A".to_string(), sample(0, 0)),
            ("VDD_B".to_string(), sample(0, 0)),
        ]);
        let mut telemetry = PowerTelemetry::new(rails, &initial).unwrap();

        let batch = HashMap::from([
            ("VDD_A".to_string(), sample(100, 100)),
            ("VDD_B".to_string(), sample(300, 100)),
        ]);
        telemetry.refresh(&batch, 100);

        let snapshot = telemetry.snapshot();
        // 1.0 * 1.0 + 3.0 * 2.0 + 0.5 offset
        assert_eq!(snapshot.avg_power("VDD_SUM"), Some(7.5));
        // The plain rail keeps its own window. VDD_SUM's window on VDD_A is
        // independent of it.
        assert_eq!(snapshot.avg_power("VDD_A"), Some(1.0));
    }

    #[test_log::test]
    fn count_threshold_virtual_rail() {
        let rails = BTreeMap::from([(
            "HOT_RAILS".to_string(),
            RailConfig {
                power_sample_count: 1,
                power_sample_delay_ms: 0,
                virtual_rail: Some(VirtualRailConfig {
                    linked_rails: vec!["VDD_A".into(), "VDD_B".into()],
                    coefficients: vec![2.0, 2.0],
                    offset: 0.0,
                    formula: Formula::CountThreshold,
                }),
            },
        )]);
        let initial = HashMap::from([
            ("VDD_A".to_string(), sample(0, 0)),
            ("VDD_B".to_string(), sample(0, 0)),
        ]);
        let mut telemetry = PowerTelemetry::new(rails, &initial).unwrap();

        let batch = HashMap::from([
            ("VDD_A".to_string(), sample(300, 100)), // 3.0 mW, over
            ("VDD_B".to_string(), sample(100, 100)), // 1.0 mW, under
        ]);
        telemetry.refresh(&batch, 100);
        assert_eq!(telemetry.snapshot().avg_power("HOT_RAILS"), Some(1.0));
    }

    #[test_log::test]
    fn malformed_virtual_rail_is_rejected() {
        let rails = BTreeMap::from([(
            "BAD".to_string(),
            RailConfig {
                power_sample_count: 1,
                power_sample_delay_ms: 0,
                virtual_rail: Some(VirtualRailConfig {
                    linked_rails: vec!["VDD_A".into()],
                    coefficients: vec![],
                    offset: 0.0,
                    formula: Formula::WeightedAvg,
                }),
            },
        )]);
        let err = PowerTelemetry::new(rails, &HashMap::new()).unwrap_err();
        assert_eq!(err, TelemetryError::MalformedVirtualRail("BAD".into()));
    }

    #[test_log::test]
    fn snapshot_from_iter_for_fixtures() {
        let snapshot: PowerSnapshot = [
            ("VDD_A".to_string(), Some(120.0)),
            ("VDD_B".to_string(), None),
        ]
        .into_iter()
        .collect();
        assert_eq!(snapshot.avg_power("VDD_A"), Some(120.0));
        assert_eq!(snapshot.avg_power("VDD_B"), None);
        assert!(snapshot.contains_rail("VDD_B"));
        assert!(!snapshot.contains_rail("VDD_C"));
    }
}
