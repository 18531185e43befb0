//! Threshold-based automation rules.
//!
//! [`evaluate`] is a pure function from the current snapshot to desired
//! actuator states and alerts; it never mutates the state store. The
//! automation loop applies the decision and only acts on actual
//! transitions.

use crate::event::{Alert, AlertKind};
use crate::state::SystemSnapshot;
use serde::Deserialize;

/// Rule thresholds, loaded from the `[thresholds]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    /// °C above which the fan turns on
    #[serde(default = "default_temperature_high")]
    pub temperature_high: f64,
    /// °C above which a critical alert is raised with the fan
    #[serde(default = "default_temperature_critical")]
    pub temperature_critical: f64,
    /// % above which a humidity alert is raised
    #[serde(default = "default_humidity_high")]
    pub humidity_high: f64,
    /// lux below which the light turns on
    #[serde(default = "default_light_threshold")]
    pub light_threshold: f64,
}

fn default_temperature_high() -> f64 {
    28.0
}

fn default_temperature_critical() -> f64 {
    35.0
}

fn default_humidity_high() -> f64 {
    70.0
}

fn default_light_threshold() -> f64 {
    300.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature_high: default_temperature_high(),
            temperature_critical: default_temperature_critical(),
            humidity_high: default_humidity_high(),
            light_threshold: default_light_threshold(),
        }
    }
}

/// Outcome of one rule evaluation: desired actuator states, the new
/// critical-latch value, plus any alerts raised this cycle.
#[derive(Debug, Clone)]
pub struct Decision {
    pub fan_on: bool,
    pub light_on: bool,
    /// Whether the critical-temperature condition holds after this
    /// evaluation; stored back so the next cycle can tell a fresh
    /// excursion from an ongoing one.
    pub critical_latched: bool,
    pub alerts: Vec<Alert>,
}

/// Evaluate the automation rules against the current snapshot.
///
/// - Fan: on iff `temperature > temperature_high`. Single threshold in
///   both directions, so values oscillating around it will toggle the
///   fan. Known boundary behavior, kept as-is.
/// - Critical alert: raised once when the fan is commanded on and the
///   temperature enters the critical range, whether that happens at the
///   fan's off→on transition or while the fan is already running. The
///   latch clears when the condition ends, so a later excursion alerts
///   again, but an ongoing one never repeats per tick.
/// - Humidity alert: raised on every evaluation while
///   `humidity > humidity_high`, with no transition gating.
/// - Light: on iff `light_level < light_threshold`; no alert.
pub fn evaluate(snapshot: &SystemSnapshot, thresholds: &Thresholds) -> Decision {
    let fan_on = snapshot.temperature > thresholds.temperature_high;
    let light_on = snapshot.light_level < thresholds.light_threshold;
    let critical = fan_on && snapshot.temperature > thresholds.temperature_critical;

    let mut alerts = Vec::new();

    if critical && !snapshot.critical_latched {
        alerts.push(Alert::new(
            AlertKind::TemperatureCritical,
            format!("Critical temperature: {:.1}C", snapshot.temperature),
            snapshot.temperature,
        ));
    }

    if snapshot.humidity > thresholds.humidity_high {
        alerts.push(Alert::new(
            AlertKind::HumidityHigh,
            format!("High humidity: {:.1}%", snapshot.humidity),
            snapshot.humidity,
        ));
    }

    Decision {
        fan_on,
        light_on,
        critical_latched: critical,
        alerts,
    }
}
