//! In-memory system state: latest reading per sensor kind plus the two
//! actuator states. Owned exclusively by the automation loop; there is
//! no concurrent mutation, so no locking.

use crate::event::{ActuatorKind, SensorKind, SensorReading};
use chrono::{DateTime, Utc};

/// Current state of one actuator. At most one per kind.
///
/// Mutated only through [`StateStore::set_actuator`] after a rule
/// decision; inbound messages never touch it (no echo cycle from
/// actuator-status topics).
#[derive(Clone, Debug)]
pub struct ActuatorState {
    pub on: bool,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub auto_triggered: bool,
}

impl ActuatorState {
    fn new() -> Self {
        Self {
            on: false,
            last_changed_at: None,
            auto_triggered: false,
        }
    }
}

/// Transient aggregate of the latest readings and actuator states.
///
/// Exists only as a read for rule evaluation, persistence and
/// reporting; it is never persisted as an entity.
#[derive(Clone, Copy, Debug)]
pub struct SystemSnapshot {
    pub temperature: f64,
    pub humidity: f64,
    pub light_level: f64,
    pub fan_on: bool,
    pub light_on: bool,
    /// Whether a critical-temperature alert has already been raised for
    /// the ongoing excursion above the critical threshold.
    pub critical_latched: bool,
}

/// Holder of the latest sensor readings and actuator states.
///
/// Created empty at engine start and discarded on shutdown; a restart
/// always cold-starts.
pub struct StateStore {
    temperature: Option<SensorReading>,
    humidity: Option<SensorReading>,
    light: Option<SensorReading>,
    fan: ActuatorState,
    light_actuator: ActuatorState,
    critical_latched: bool,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            temperature: None,
            humidity: None,
            light: None,
            fan: ActuatorState::new(),
            light_actuator: ActuatorState::new(),
            critical_latched: false,
        }
    }

    /// Last-write-wins update of the reading slot for the given kind.
    ///
    /// Late or out-of-order messages silently overwrite; older values
    /// are discarded, not queued.
    pub fn apply_reading(&mut self, reading: SensorReading) {
        let slot = match reading.kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
            SensorKind::Light => &mut self.light,
        };
        *slot = Some(reading);
    }

    /// Cold-start gate: true once all three kinds have been observed at
    /// least once since engine start.
    pub fn ready(&self) -> bool {
        self.temperature.is_some() && self.humidity.is_some() && self.light.is_some()
    }

    /// Aggregate read of the current state; `None` until the cold-start
    /// gate is satisfied.
    pub fn snapshot(&self) -> Option<SystemSnapshot> {
        match (&self.temperature, &self.humidity, &self.light) {
            (Some(t), Some(h), Some(l)) => Some(SystemSnapshot {
                temperature: t.value,
                humidity: h.value,
                light_level: l.value,
                fan_on: self.fan.on,
                light_on: self.light_actuator.on,
                critical_latched: self.critical_latched,
            }),
            _ => None,
        }
    }

    pub fn actuator(&self, kind: ActuatorKind) -> &ActuatorState {
        match kind {
            ActuatorKind::Fan => &self.fan,
            ActuatorKind::Light => &self.light_actuator,
        }
    }

    /// Apply a desired actuator state.
    ///
    /// Returns whether this call represents a transition (differs from
    /// the stored state). Only a transition counts as an event worth
    /// publishing or persisting.
    pub fn set_actuator(&mut self, kind: ActuatorKind, on: bool, auto_triggered: bool) -> bool {
        let state = match kind {
            ActuatorKind::Fan => &mut self.fan,
            ActuatorKind::Light => &mut self.light_actuator,
        };
        if state.on == on {
            return false;
        }
        state.on = on;
        state.last_changed_at = Some(Utc::now());
        state.auto_triggered = auto_triggered;
        true
    }

    /// Latch (or clear) the critical-temperature alert marker computed
    /// by the last rule evaluation.
    pub fn set_critical_latch(&mut self, latched: bool) {
        self.critical_latched = latched;
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
