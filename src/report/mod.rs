//! ThingSpeak-style time-series mirror.
//!
//! Snapshots are pushed as ordered numeric fields (`field1..fieldN`)
//! on a GET request. Failures are tolerated: the automation loop logs
//! them and tries again on the next reporting tick.

use crate::engine::Reporter;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// ThingSpeak free-tier rate limit. The engine never pushes more often
/// than this, whatever the configured interval says.
pub const MIN_PUSH_INTERVAL_SECONDS: u64 = 15;

/// Reporting endpoint configuration, `[reporting]` config section.
///
/// Reporting is disabled entirely when no API key is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_url")]
    pub url: String,
    pub api_key: Option<String>,
}

fn default_url() -> String {
    "https://api.thingspeak.com/update".to_string()
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: None,
        }
    }
}

/// HTTP reporter pushing snapshot fields to a ThingSpeak-compatible
/// update endpoint.
pub struct ThingSpeakReporter {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl ThingSpeakReporter {
    /// Build a reporter from config; `None` when reporting is disabled
    /// (no API key).
    pub fn from_config(config: &ReportingConfig) -> Option<Self> {
        let api_key = config.api_key.clone().filter(|k| !k.is_empty())?;
        Some(Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Reporter for ThingSpeakReporter {
    /// Push ordered fields as `field1..fieldN` query parameters.
    async fn push(&self, fields: &[(&str, f64)]) -> Result<()> {
        let mut query: Vec<(String, String)> = vec![("api_key".to_string(), self.api_key.clone())];
        for (i, (name, value)) in fields.iter().enumerate() {
            debug!(field = i + 1, name = *name, value = *value, "Report field");
            query.push((format!("field{}", i + 1), value.to_string()));
        }

        let response = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .context("Failed to send report request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("report endpoint returned status {}", status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_disabled_without_api_key() {
        let config = ReportingConfig::default();
        assert!(ThingSpeakReporter::from_config(&config).is_none());

        // An empty key counts as absent
        let config = ReportingConfig {
            api_key: Some(String::new()),
            ..ReportingConfig::default()
        };
        assert!(ThingSpeakReporter::from_config(&config).is_none());
    }

    #[test]
    fn test_reporter_enabled_with_api_key() {
        let config = ReportingConfig {
            api_key: Some("WRITEKEY".to_string()),
            ..ReportingConfig::default()
        };
        let reporter = ThingSpeakReporter::from_config(&config).unwrap();
        assert_eq!(reporter.url, "https://api.thingspeak.com/update");
        assert_eq!(reporter.api_key, "WRITEKEY");
    }
}
