use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod classify;

pub use classify::{classify, ClassifyError};

/// Sensor kinds the engine reconciles.
///
/// One topic per kind under the sensor topic root, e.g.
/// `smarthome/sensors/temperature`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Light,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Light => "light",
        }
    }

    /// Map the final topic segment to a sensor kind.
    ///
    /// Accepts both `light` and `light_level`; the firmware publishes
    /// the latter on some boards.
    pub fn from_topic_segment(segment: &str) -> Option<Self> {
        match segment {
            "temperature" => Some(SensorKind::Temperature),
            "humidity" => Some(SensorKind::Humidity),
            "light" | "light_level" => Some(SensorKind::Light),
            _ => None,
        }
    }
}

/// A single sensor observation. Immutable once constructed; a newer
/// reading of the same kind replaces the older one (last-write-wins).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(kind: SensorKind, value: f64) -> Self {
        Self {
            kind,
            value,
            observed_at: Utc::now(),
        }
    }
}

/// Actuators governed by the automation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    Fan,
    Light,
}

impl ActuatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorKind::Fan => "fan",
            ActuatorKind::Light => "light",
        }
    }
}

/// On/off action carried by a command payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchAction {
    On,
    Off,
}

impl SwitchAction {
    pub fn from_on(on: bool) -> Self {
        if on {
            SwitchAction::On
        } else {
            SwitchAction::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchAction::On => "on",
            SwitchAction::Off => "off",
        }
    }
}

/// Command published to an actuator's command topic.
///
/// Payload format matches what the firmware expects:
/// `{"actuator": "fan", "action": "on", "timestamp": 1700000000}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub actuator: ActuatorKind,
    pub action: SwitchAction,
    /// Unix epoch seconds
    pub timestamp: i64,
}

impl ActuatorCommand {
    pub fn new(actuator: ActuatorKind, on: bool) -> Self {
        Self {
            actuator,
            action: SwitchAction::from_on(on),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Alert categories raised by the rule evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TemperatureCritical,
    HumidityHigh,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::TemperatureCritical => "temperature_critical",
            AlertKind::HumidityHigh => "humidity_high",
        }
    }
}

/// One-shot alert forwarded to persistence and published on the alert
/// topic. Never stored in the state store.
///
/// Wire format: `{"type": "...", "message": "...", "value": 36.2,
/// "timestamp": 1700000000}`
#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub value: f64,
    #[serde(rename = "timestamp")]
    pub raised_at: i64,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>, value: f64) -> Self {
        Self {
            kind,
            message: message.into(),
            value,
            raised_at: Utc::now().timestamp(),
        }
    }
}
