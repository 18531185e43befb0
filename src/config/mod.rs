use anyhow::{bail, Context, Result};
use serde::Deserialize;

// Re-export section types defined next to the modules they configure
pub use crate::engine::EngineConfig;
pub use crate::mqtt::MqttConfig;
pub use crate::report::{ReportingConfig, MIN_PUSH_INTERVAL_SECONDS};
pub use crate::rules::Thresholds;

/// Complete backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AbodeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Local database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "abode.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AbodeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            thresholds: Thresholds::default(),
            storage: StorageConfig::default(),
            reporting: ReportingConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl AbodeConfig {
    /// Sanity-check the loaded configuration before the engine starts.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.broker.is_empty() {
            bail!("mqtt.broker must not be empty");
        }
        if self.thresholds.temperature_critical <= self.thresholds.temperature_high {
            bail!(
                "thresholds.temperature_critical ({}) must be greater than temperature_high ({})",
                self.thresholds.temperature_critical,
                self.thresholds.temperature_high
            );
        }
        if self.engine.report_interval_seconds < MIN_PUSH_INTERVAL_SECONDS {
            bail!(
                "engine.report_interval_seconds must be >= {} (external rate limit)",
                MIN_PUSH_INTERVAL_SECONDS
            );
        }
        if self.engine.tick_millis == 0 {
            bail!("engine.tick_millis must be at least 1");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<AbodeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: AbodeConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse '{}'", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AbodeConfig::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.thresholds.temperature_high, 28.0);
        assert_eq!(config.thresholds.temperature_critical, 35.0);
        assert_eq!(config.storage.path, "abode.db");
        assert_eq!(config.engine.persist_interval_seconds, 30);
        assert_eq!(config.engine.report_interval_seconds, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [mqtt]
            broker = "broker.example.com"
            port = 8883
            tls = true
            username = "backend"
            password = "secret"

            [thresholds]
            temperature_high = 26.0
            temperature_critical = 32.0
            humidity_high = 65.0
            light_threshold = 250.0

            [storage]
            path = "/var/lib/abode/readings.db"

            [reporting]
            api_key = "WRITEKEY"

            [engine]
            tick_millis = 500
            persist_interval_seconds = 60
            report_interval_seconds = 30
        "#;

        let config: AbodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.mqtt.broker, "broker.example.com");
        assert_eq!(config.mqtt.port, 8883);
        assert!(config.mqtt.tls);
        assert_eq!(config.thresholds.temperature_critical, 32.0);
        assert_eq!(config.storage.path, "/var/lib/abode/readings.db");
        assert_eq!(config.reporting.api_key.as_deref(), Some("WRITEKEY"));
        assert_eq!(config.engine.report_interval_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
            [mqtt]
            broker = "localhost"
        "#;

        let config: AbodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.mqtt.port, 1883); // Default
        assert_eq!(config.thresholds.light_threshold, 300.0); // Default
        assert!(config.reporting.api_key.is_none()); // Reporting disabled
    }

    #[test]
    fn test_validate_rejects_inverted_temperature_thresholds() {
        let mut config = AbodeConfig::default();
        config.thresholds.temperature_critical = config.thresholds.temperature_high;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_report_interval_below_floor() {
        let mut config = AbodeConfig::default();
        config.engine.report_interval_seconds = 5;
        assert!(config.validate().is_err());
    }
}
