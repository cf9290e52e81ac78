//! Severity-table hard-limit requests.

use std::collections::BTreeMap;

use thermal_types::{BoundCdevConfig, Severity};

use crate::state::SensorControlState;

/// Looks up each hard-limited device's minimum state for the current
/// severity. Disabled devices request fully unthrottled.
pub(crate) fn update_requests_by_severity(
    bound: &BTreeMap<String, BoundCdevConfig>,
    severity: Severity,
    state: &mut SensorControlState,
) {
    let sev = severity.as_index();
    for (name, request) in &mut state.hardlimit_cdev_request {
        let Some(config) = bound.get(name) else {
            continue;
        };
        *request = if config.enabled {
            config.limit_info[sev]
        } else {
            0
        };
        tracing::trace!(cdev = name.as_str(), request = *request, "hard-limit request");
    }
}
