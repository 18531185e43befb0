//! The automation loop: the single coordinating task tying transport,
//! state store, rule evaluator and the downstream gateways together.
//!
//! One logical loop owns the state store outright: inbound messages,
//! rule evaluation and actuator bookkeeping all happen on this task, so
//! the store needs no locking. The only concurrency seam is the
//! transport's poll task feeding the inbound channel.

use crate::event::{classify, ActuatorCommand, ActuatorKind, Alert};
use crate::mqtt::{SessionError, SessionEvent};
use crate::report::MIN_PUSH_INTERVAL_SECONDS;
use crate::rules::{evaluate, Decision, Thresholds};
use crate::state::StateStore;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outbound side of the transport session, as seen by the loop.
///
/// The real implementation is [`crate::mqtt::MqttSession`]; tests plug
/// in a recording fake. Publishing is fire-and-forget: a failure is
/// logged and the iteration continues.
#[async_trait]
pub trait Transport: Send {
    async fn publish_command(&mut self, command: &ActuatorCommand) -> Result<(), SessionError>;
    async fn publish_alert(&mut self, alert: &Alert) -> Result<(), SessionError>;
    async fn disconnect(&mut self);
}

/// Aggregate statistics surfaced at shutdown, best-effort.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_readings: u64,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
}

/// Fire-and-forget persistence calls. Failures are logged, never
/// retried inline; the next scheduled tick attempts again.
pub trait PersistenceGateway: Send + Sync {
    fn save_sensor_reading(&self, temperature: f64, humidity: f64, light_level: f64)
        -> Result<i64>;
    fn save_actuator_event(
        &self,
        actuator: ActuatorKind,
        action: &str,
        auto_triggered: bool,
    ) -> Result<i64>;
    fn save_alert(&self, alert: &Alert) -> Result<i64>;
    fn statistics(&self) -> Result<Statistics>;
}

/// External time-series mirror. Tolerant of failure; never called more
/// often than the configured minimum interval.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn push(&self, fields: &[(&str, f64)]) -> Result<()>;
}

/// Loop timing, loaded from the `[engine]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Bounded sleep between iterations
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// How often the latest snapshot is written to storage
    #[serde(default = "default_persist_interval")]
    pub persist_interval_seconds: u64,
    /// How often the snapshot is mirrored to the reporting endpoint
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_persist_interval() -> u64 {
    30
}

fn default_report_interval() -> u64 {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            persist_interval_seconds: default_persist_interval(),
            report_interval_seconds: default_report_interval(),
        }
    }
}

/// The core orchestrator. Constructed once with injected transport,
/// thresholds and gateway handles; owns the state store for its whole
/// lifetime.
pub struct AutomationLoop<T, P, R>
where
    T: Transport,
    P: PersistenceGateway,
    R: Reporter,
{
    transport: T,
    inbound: mpsc::Receiver<SessionEvent>,
    store: StateStore,
    thresholds: Thresholds,
    persistence: P,
    /// `None` disables reporting entirely
    reporter: Option<R>,
    config: EngineConfig,
    shutdown: watch::Receiver<bool>,
    degraded: bool,
}

impl<T, P, R> AutomationLoop<T, P, R>
where
    T: Transport,
    P: PersistenceGateway,
    R: Reporter,
{
    pub fn new(
        transport: T,
        inbound: mpsc::Receiver<SessionEvent>,
        thresholds: Thresholds,
        persistence: P,
        reporter: Option<R>,
        config: EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            inbound,
            store: StateStore::new(),
            thresholds,
            persistence,
            reporter,
            config,
            shutdown,
            degraded: false,
        }
    }

    /// Run until shutdown is signalled.
    ///
    /// Each iteration: check shutdown, drain all currently available
    /// inbound events, check the persistence and reporting timers
    /// (checked, never awaited), then sleep one bounded tick. Only the
    /// shutdown signal ends the loop; downstream failures never do.
    pub async fn run(mut self) -> Result<()> {
        let tick = Duration::from_millis(self.config.tick_millis.max(1));
        let persist_interval = Duration::from_secs(self.config.persist_interval_seconds);
        // Respect the external rate limit even if the config slipped past
        // validation.
        let report_interval = Duration::from_secs(
            self.config
                .report_interval_seconds
                .max(MIN_PUSH_INTERVAL_SECONDS),
        );

        info!(
            tick_ms = self.config.tick_millis,
            persist_s = persist_interval.as_secs(),
            report_s = report_interval.as_secs(),
            reporting = self.reporter.is_some(),
            "Automation loop started"
        );

        let mut last_persist: Option<Instant> = None;
        let mut last_report: Option<Instant> = None;

        loop {
            if *self.shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }

            self.drain_inbound().await;

            if due(last_persist, persist_interval) {
                self.persist_snapshot();
                last_persist = Some(Instant::now());
            }

            if self.reporter.is_some() && due(last_report, report_interval) {
                self.report_snapshot().await;
                last_report = Some(Instant::now());
            }

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Drain every event currently queued, without blocking.
    async fn drain_inbound(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(SessionEvent::Message { topic, payload }) => {
                    self.handle_message(&topic, &payload).await;
                }
                Ok(SessionEvent::Connected) => {
                    if self.degraded {
                        info!("Transport reconnected, ingestion resumed");
                    }
                    self.degraded = false;
                }
                Ok(SessionEvent::Disconnected { reason }) => {
                    warn!(reason = %reason, "Transport disconnected; continuing on stale state");
                    self.degraded = true;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if !self.degraded {
                        warn!("Inbound channel closed; continuing on stale state");
                        self.degraded = true;
                    }
                    break;
                }
            }
        }
    }

    /// Classify one inbound message, apply it, and evaluate the rules.
    ///
    /// A malformed message is logged and skipped; it never aborts the
    /// iteration. Evaluation runs on every applied reading once the
    /// cold-start gate is satisfied, whichever kind changed.
    async fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        let reading = match classify(topic, payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Ignoring unclassifiable message");
                return;
            }
        };

        debug!(kind = reading.kind.as_str(), value = reading.value, "Reading applied");
        self.store.apply_reading(reading);

        let Some(snapshot) = self.store.snapshot() else {
            return;
        };
        let decision = evaluate(&snapshot, &self.thresholds);
        self.apply_decision(decision).await;
    }

    /// Apply a rule decision: publish a command and persist an event for
    /// each actual transition, then forward this cycle's alerts.
    async fn apply_decision(&mut self, decision: Decision) {
        self.store.set_critical_latch(decision.critical_latched);

        let desired = [
            (ActuatorKind::Fan, decision.fan_on),
            (ActuatorKind::Light, decision.light_on),
        ];

        for (kind, on) in desired {
            if !self.store.set_actuator(kind, on, true) {
                continue;
            }
            let command = ActuatorCommand::new(kind, on);
            info!(
                actuator = kind.as_str(),
                action = command.action.as_str(),
                "Actuator transition"
            );
            if let Err(e) = self.transport.publish_command(&command).await {
                warn!(actuator = kind.as_str(), error = %e, "Failed to publish command");
            }
            if let Err(e) =
                self.persistence
                    .save_actuator_event(kind, command.action.as_str(), true)
            {
                warn!(actuator = kind.as_str(), error = %e, "Failed to persist actuator event");
            }
        }

        for alert in decision.alerts {
            info!(kind = alert.kind.as_str(), value = alert.value, "Alert raised");
            if let Err(e) = self.transport.publish_alert(&alert).await {
                warn!(kind = alert.kind.as_str(), error = %e, "Failed to publish alert");
            }
            if let Err(e) = self.persistence.save_alert(&alert) {
                warn!(kind = alert.kind.as_str(), error = %e, "Failed to persist alert");
            }
        }
    }

    /// Save the latest snapshot, skipped until all three readings are
    /// present.
    fn persist_snapshot(&self) {
        let Some(snapshot) = self.store.snapshot() else {
            return;
        };
        match self.persistence.save_sensor_reading(
            snapshot.temperature,
            snapshot.humidity,
            snapshot.light_level,
        ) {
            Ok(id) => debug!(id, "Reading persisted"),
            Err(e) => warn!(error = %e, "Failed to persist reading"),
        }
    }

    /// Mirror the latest snapshot plus fan state to the reporting
    /// endpoint.
    async fn report_snapshot(&self) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let Some(snapshot) = self.store.snapshot() else {
            return;
        };
        let fields = [
            ("temperature", snapshot.temperature),
            ("humidity", snapshot.humidity),
            ("light_level", snapshot.light_level),
            ("fan", if snapshot.fan_on { 1.0 } else { 0.0 }),
        ];
        match reporter.push(&fields).await {
            Ok(()) => debug!("Snapshot reported"),
            Err(e) => warn!(error = %e, "Report push failed"),
        }
    }

    /// Release the transport and surface final statistics, best-effort.
    async fn cleanup(&mut self) {
        self.transport.disconnect().await;
        match self.persistence.statistics() {
            Ok(stats) => info!(
                total_readings = stats.total_readings,
                avg_temperature = ?stats.avg_temperature,
                avg_humidity = ?stats.avg_humidity,
                "Final statistics"
            ),
            Err(e) => warn!(error = %e, "Statistics unavailable at shutdown"),
        }
        info!("Automation loop stopped");
    }
}

fn due(last: Option<Instant>, interval: Duration) -> bool {
    match last {
        None => true,
        Some(at) => at.elapsed() >= interval,
    }
}
