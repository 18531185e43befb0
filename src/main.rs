use abode::config::{load_config, AbodeConfig};
use abode::engine::AutomationLoop;
use abode::mqtt::MqttSession;
use abode::report::ThingSpeakReporter;
use abode::storage::ReadingStore;
use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abode=info".into()),
        )
        .init();

    info!("Abode backend starting...");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "abode.toml".to_string());
    let config: AbodeConfig = if std::path::Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        AbodeConfig::default()
    };
    config.validate().context("Invalid configuration")?;

    info!(
        broker = %format!("{}:{}", config.mqtt.broker, config.mqtt.port),
        db = %config.storage.path,
        reporting = config.reporting.api_key.is_some(),
        "Configuration loaded"
    );

    let store = ReadingStore::new(&config.storage.path)
        .context("Failed to initialize reading store")?;
    info!("Reading store initialized");

    let reporter = ThingSpeakReporter::from_config(&config.reporting);
    if reporter.is_none() {
        info!("Reporting disabled (no API key configured)");
    }

    // Startup connect failure is the one fatal transport error
    let (mut session, inbound) = MqttSession::new(config.mqtt.clone());
    session
        .connect()
        .await
        .context("Failed to connect to MQTT broker")?;
    session
        .subscribe(&config.mqtt.sensor_filter())
        .await
        .context("Failed to subscribe to sensor topics")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = AutomationLoop::new(
        session,
        inbound,
        config.thresholds.clone(),
        store,
        reporter,
        config.engine.clone(),
        shutdown_rx,
    );
    let engine_handle = tokio::spawn(engine.run());

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    engine_handle
        .await
        .context("Automation loop task panicked")??;

    info!("Abode backend stopped");
    Ok(())
}
