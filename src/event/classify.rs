use super::{SensorKind, SensorReading};
use thiserror::Error;

/// Why an inbound message could not be turned into a sensor reading.
///
/// Classification failures are recovered per-message by the automation
/// loop; they never abort the iteration.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("topic '{0}' does not map to a known sensor")]
    UnknownTopic(String),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload has no numeric 'value' field")]
    MissingValue,
}

/// Classify an inbound sensor message by topic and payload.
///
/// The sensor kind is taken from the final topic segment
/// (`smarthome/sensors/temperature` → `Temperature`); the payload must
/// be a JSON object carrying a numeric `value` field.
pub fn classify(topic: &str, payload: &[u8]) -> Result<SensorReading, ClassifyError> {
    let segment = topic.rsplit('/').next().unwrap_or(topic);
    let kind = SensorKind::from_topic_segment(segment)
        .ok_or_else(|| ClassifyError::UnknownTopic(topic.to_string()))?;

    let data: serde_json::Value = serde_json::from_slice(payload)?;
    let value = data
        .get("value")
        .and_then(|v| v.as_f64())
        .ok_or(ClassifyError::MissingValue)?;

    Ok(SensorReading::new(kind, value))
}
