// Integration tests for the automation loop: end-to-end message flow
// through classification, state reconciliation, rule evaluation and the
// outbound gateways, driven over recording fakes with paused time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use abode::engine::{
    AutomationLoop, EngineConfig, PersistenceGateway, Reporter, Statistics, Transport,
};
use abode::event::{ActuatorCommand, ActuatorKind, Alert, AlertKind, SwitchAction};
use abode::mqtt::{SessionError, SessionEvent};
use abode::rules::Thresholds;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Everything the loop pushed outward, shared by all three fakes.
#[derive(Default)]
struct Recorded {
    commands: Vec<ActuatorCommand>,
    published_alerts: Vec<Alert>,
    persisted_readings: Vec<(f64, f64, f64)>,
    actuator_events: Vec<(ActuatorKind, String, bool)>,
    persisted_alerts: Vec<Alert>,
    pushes: Vec<(Instant, Vec<f64>)>,
    disconnected: bool,
}

struct FakeTransport {
    rec: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn publish_command(&mut self, command: &ActuatorCommand) -> Result<(), SessionError> {
        self.rec.lock().unwrap().commands.push(command.clone());
        Ok(())
    }

    async fn publish_alert(&mut self, alert: &Alert) -> Result<(), SessionError> {
        self.rec.lock().unwrap().published_alerts.push(alert.clone());
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.rec.lock().unwrap().disconnected = true;
    }
}

struct FakeGateway {
    rec: Arc<Mutex<Recorded>>,
}

impl PersistenceGateway for FakeGateway {
    fn save_sensor_reading(
        &self,
        temperature: f64,
        humidity: f64,
        light_level: f64,
    ) -> Result<i64> {
        let mut rec = self.rec.lock().unwrap();
        rec.persisted_readings
            .push((temperature, humidity, light_level));
        Ok(rec.persisted_readings.len() as i64)
    }

    fn save_actuator_event(
        &self,
        actuator: ActuatorKind,
        action: &str,
        auto_triggered: bool,
    ) -> Result<i64> {
        let mut rec = self.rec.lock().unwrap();
        rec.actuator_events
            .push((actuator, action.to_string(), auto_triggered));
        Ok(rec.actuator_events.len() as i64)
    }

    fn save_alert(&self, alert: &Alert) -> Result<i64> {
        let mut rec = self.rec.lock().unwrap();
        rec.persisted_alerts.push(alert.clone());
        Ok(rec.persisted_alerts.len() as i64)
    }

    fn statistics(&self) -> Result<Statistics> {
        Ok(Statistics::default())
    }
}

struct FakeReporter {
    rec: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl Reporter for FakeReporter {
    async fn push(&self, fields: &[(&str, f64)]) -> Result<()> {
        let values = fields.iter().map(|(_, v)| *v).collect();
        self.rec
            .lock()
            .unwrap()
            .pushes
            .push((Instant::now(), values));
        Ok(())
    }
}

struct Harness {
    events: mpsc::Sender<SessionEvent>,
    shutdown: watch::Sender<bool>,
    rec: Arc<Mutex<Recorded>>,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl Harness {
    fn spawn(config: EngineConfig, with_reporter: bool) -> Self {
        let rec = Arc::new(Mutex::new(Recorded::default()));
        let (events, inbound) = mpsc::channel(64);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reporter = with_reporter.then(|| FakeReporter { rec: rec.clone() });
        let engine = AutomationLoop::new(
            FakeTransport { rec: rec.clone() },
            inbound,
            Thresholds::default(),
            FakeGateway { rec: rec.clone() },
            reporter,
            config,
            shutdown_rx,
        );
        let handle = tokio::spawn(engine.run());

        Self {
            events,
            shutdown,
            rec,
            handle,
        }
    }

    async fn send_reading(&self, sensor: &str, value: f64) {
        let event = SessionEvent::Message {
            topic: format!("smarthome/sensors/{sensor}"),
            payload: format!("{{\"value\": {value}}}").into_bytes(),
        };
        self.events.send(event).await.unwrap();
    }

    /// Let the loop process whatever is queued.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn stop(self) -> Arc<Mutex<Recorded>> {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
        self.rec
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_millis: 10,
        persist_interval_seconds: 30,
        report_interval_seconds: 20,
    }
}

#[tokio::test(start_paused = true)]
async fn no_commands_until_all_sensor_kinds_seen() {
    let harness = Harness::spawn(fast_config(), false);

    // Two of three kinds: above the fan threshold, but the gate holds
    harness.send_reading("temperature", 30.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.settle().await;
    assert!(harness.rec.lock().unwrap().commands.is_empty());

    // Third kind completes the snapshot and evaluation runs
    harness.send_reading("light", 500.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    assert_eq!(rec.commands.len(), 1);
    assert_eq!(rec.commands[0].actuator, ActuatorKind::Fan);
    assert_eq!(rec.commands[0].action, SwitchAction::On);
}

#[tokio::test(start_paused = true)]
async fn fan_commands_only_on_transitions() {
    let harness = Harness::spawn(fast_config(), false);

    harness.send_reading("temperature", 30.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.send_reading("light", 500.0).await;
    harness.settle().await;

    // Still above threshold: no duplicate command
    harness.send_reading("temperature", 31.0).await;
    harness.settle().await;

    harness.send_reading("temperature", 20.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    let fan: Vec<_> = rec
        .commands
        .iter()
        .filter(|c| c.actuator == ActuatorKind::Fan)
        .collect();
    assert_eq!(fan.len(), 2);
    assert_eq!(fan[0].action, SwitchAction::On);
    assert_eq!(fan[1].action, SwitchAction::Off);

    // Each transition also landed in persistence as an auto event
    assert_eq!(rec.actuator_events.len(), 2);
    assert!(rec.actuator_events.iter().all(|(_, _, auto)| *auto));
}

#[tokio::test(start_paused = true)]
async fn critical_alert_raised_exactly_once_while_condition_holds() {
    let harness = Harness::spawn(fast_config(), false);

    // Warm but not critical: fan on, no alert
    harness.send_reading("temperature", 30.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.send_reading("light", 500.0).await;
    harness.settle().await;
    assert!(harness.rec.lock().unwrap().published_alerts.is_empty());

    // Climbs past critical while the fan is already running
    harness.send_reading("temperature", 36.0).await;
    harness.settle().await;
    {
        let rec = harness.rec.lock().unwrap();
        assert_eq!(rec.published_alerts.len(), 1);
        assert_eq!(rec.published_alerts[0].kind, AlertKind::TemperatureCritical);
        // No extra fan command for a fan that is already on
        assert_eq!(rec.commands.len(), 1);
    }

    // Still critical: no repeat
    harness.send_reading("temperature", 36.5).await;
    harness.settle().await;
    assert_eq!(harness.rec.lock().unwrap().published_alerts.len(), 1);

    // Recovery turns the fan off
    harness.send_reading("temperature", 20.0).await;
    harness.settle().await;

    // Darkness turns the light on
    harness.send_reading("light", 100.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    assert_eq!(rec.published_alerts.len(), 1);
    assert_eq!(rec.persisted_alerts.len(), 1);
    let last = rec.commands.last().unwrap();
    assert_eq!(last.actuator, ActuatorKind::Light);
    assert_eq!(last.action, SwitchAction::On);
}

#[tokio::test(start_paused = true)]
async fn critical_alert_fires_again_after_recovery() {
    let harness = Harness::spawn(fast_config(), false);

    harness.send_reading("temperature", 36.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.send_reading("light", 500.0).await;
    harness.settle().await;

    harness.send_reading("temperature", 20.0).await;
    harness.settle().await;

    harness.send_reading("temperature", 36.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    assert_eq!(rec.published_alerts.len(), 2);
    assert!(rec
        .published_alerts
        .iter()
        .all(|a| a.kind == AlertKind::TemperatureCritical));
}

#[tokio::test(start_paused = true)]
async fn humidity_alert_repeats_per_reading() {
    let harness = Harness::spawn(fast_config(), false);

    harness.send_reading("temperature", 20.0).await;
    harness.send_reading("humidity", 85.0).await;
    harness.send_reading("light", 500.0).await;
    harness.settle().await;

    harness.send_reading("humidity", 86.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    let humidity: Vec<_> = rec
        .published_alerts
        .iter()
        .filter(|a| a.kind == AlertKind::HumidityHigh)
        .collect();
    assert_eq!(humidity.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_payloads_are_skipped_without_stalling() {
    let harness = Harness::spawn(fast_config(), false);

    harness
        .events
        .send(SessionEvent::Message {
            topic: "smarthome/sensors/temperature".into(),
            payload: b"not json".to_vec(),
        })
        .await
        .unwrap();
    harness
        .events
        .send(SessionEvent::Message {
            topic: "smarthome/sensors/unknown".into(),
            payload: b"{\"value\": 1}".to_vec(),
        })
        .await
        .unwrap();
    harness.settle().await;

    // Valid traffic afterwards is handled normally
    harness.send_reading("temperature", 30.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.send_reading("light", 500.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    assert_eq!(rec.commands.len(), 1);
    assert_eq!(rec.commands[0].actuator, ActuatorKind::Fan);
}

#[tokio::test(start_paused = true)]
async fn persistence_keeps_running_on_stale_state_after_disconnect() {
    let harness = Harness::spawn(fast_config(), false);

    harness.send_reading("temperature", 25.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.send_reading("light", 500.0).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    let persisted_before = harness.rec.lock().unwrap().persisted_readings.len();
    assert!(persisted_before >= 1);

    harness
        .events
        .send(SessionEvent::Disconnected {
            reason: "connection reset".into(),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    // The timer kept firing with the last known snapshot
    {
        let rec = harness.rec.lock().unwrap();
        assert!(rec.persisted_readings.len() > persisted_before);
        assert_eq!(rec.persisted_readings.last().unwrap(), &(25.0, 50.0, 500.0));
    }

    // Ingestion resumes after the session comes back
    harness.events.send(SessionEvent::Connected).await.unwrap();
    harness.send_reading("temperature", 30.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    assert_eq!(rec.commands.len(), 1);
    assert_eq!(rec.commands[0].actuator, ActuatorKind::Fan);
}

#[tokio::test(start_paused = true)]
async fn report_pushes_respect_minimum_spacing() {
    // Below the floor on purpose; the loop clamps it up to 15s
    let config = EngineConfig {
        tick_millis: 10,
        persist_interval_seconds: 30,
        report_interval_seconds: 5,
    };
    let harness = Harness::spawn(config, true);

    harness.send_reading("temperature", 25.0).await;
    harness.send_reading("humidity", 50.0).await;
    harness.send_reading("light", 500.0).await;
    tokio::time::sleep(Duration::from_secs(40)).await;

    let rec = harness.stop().await;
    let rec = rec.lock().unwrap();
    assert!(rec.pushes.len() >= 2);
    for pair in rec.pushes.windows(2) {
        let gap = pair[1].0.duration_since(pair[0].0);
        assert!(gap >= Duration::from_secs(15), "pushes {gap:?} apart");
    }
    // temperature, humidity, light_level, fan flag
    assert_eq!(rec.pushes[0].1, vec![25.0, 50.0, 500.0, 0.0]);
}

#[tokio::test(start_paused = true)]
async fn reports_skipped_until_snapshot_ready() {
    let harness = Harness::spawn(fast_config(), true);

    harness.send_reading("temperature", 25.0).await;
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(harness.rec.lock().unwrap().pushes.is_empty());

    let rec = harness.stop().await;
    assert!(rec.lock().unwrap().persisted_readings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_disconnects_transport_and_returns() {
    let harness = Harness::spawn(fast_config(), false);
    harness.send_reading("temperature", 25.0).await;
    harness.settle().await;

    let rec = harness.stop().await;
    assert!(rec.lock().unwrap().disconnected);
}
