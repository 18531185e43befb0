use crate::engine::Transport;
use crate::event::{ActuatorCommand, ActuatorKind, Alert};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// MQTT broker configuration
#[derive(Clone, Debug, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client ID; a unique suffix is generated when absent
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// TLS for cloud brokers (port 8883)
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_sensor_topic_root")]
    pub sensor_topic_root: String,
    #[serde(default = "default_command_topic_root")]
    pub command_topic_root: String,
    #[serde(default = "default_alert_topic")]
    pub alert_topic: String,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_sensor_topic_root() -> String {
    "smarthome/sensors".to_string()
}

fn default_command_topic_root() -> String {
    "smarthome/commands".to_string()
}

fn default_alert_topic() -> String {
    "smarthome/alerts".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            tls: false,
            keep_alive_seconds: default_keep_alive(),
            connect_timeout_seconds: default_connect_timeout(),
            sensor_topic_root: default_sensor_topic_root(),
            command_topic_root: default_command_topic_root(),
            alert_topic: default_alert_topic(),
        }
    }
}

impl MqttConfig {
    /// Wildcard filter covering all sensor topics.
    pub fn sensor_filter(&self) -> String {
        format!("{}/#", self.sensor_topic_root)
    }

    /// Command topic for one actuator, e.g. `smarthome/commands/fan`.
    pub fn command_topic(&self, actuator: ActuatorKind) -> String {
        format!("{}/{}", self.command_topic_root, actuator.as_str())
    }

    fn effective_client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("abode-{}", &suffix[..8])
        })
    }
}

/// Connection lifecycle: `Disconnected -> Connecting -> Connected ->
/// Disconnected`, with a `Connecting -> Disconnected` failure edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to the automation loop over the inbound channel.
#[derive(Debug)]
pub enum SessionEvent {
    /// An inbound publish on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Broker handshake completed (initial connect or reconnect)
    Connected,
    /// Connection lost; the session does not retry on its own
    Disconnected { reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to the broker")]
    NotConnected,

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("connect to {0} failed: {1}")]
    ConnectFailed(String, String),

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Transport session over an MQTT broker.
///
/// Owns the socket lifecycle and the background poll task that feeds
/// inbound messages into a single-consumer channel. `connect` may be
/// called repeatedly; every reconnect tears down the previous client
/// and replays all recorded subscription filters, since the broker is
/// assumed to forget them across sessions.
///
/// The session never retries on its own: a lost connection is
/// surfaced as [`SessionEvent::Disconnected`] and retry policy belongs
/// to the caller.
pub struct MqttSession {
    config: MqttConfig,
    client: Option<AsyncClient>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    subscriptions: Arc<RwLock<Vec<String>>>,
    event_tx: mpsc::Sender<SessionEvent>,
    poll_task: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Create a session and the inbound event channel consumed by the
    /// automation loop.
    pub fn new(config: MqttConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let session = Self {
            config,
            client: None,
            state_tx: Arc::new(state_tx),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            event_tx,
            poll_task: None,
        };
        (session, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Connect (or reconnect) to the broker.
    ///
    /// Waits for the broker handshake to resolve; returns an error on
    /// refusal or timeout. Any prior client and poll task are torn down
    /// first so repeated calls never leak a socket.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.teardown().await;

        let addr = format!("{}:{}", self.config.broker, self.config.port);
        info!(broker = %addr, tls = self.config.tls, "Connecting to MQTT broker");
        self.state_tx.send_replace(ConnectionState::Connecting);

        let mut options = MqttOptions::new(
            self.config.effective_client_id(),
            &self.config.broker,
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }
        if self.config.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        let state_tx = Arc::clone(&self.state_tx);
        let subscriptions = Arc::clone(&self.subscriptions);
        let event_tx = self.event_tx.clone();
        let task_client = client.clone();
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        state_tx.send_replace(ConnectionState::Connected);
                        info!("MQTT connection established");

                        // Replay every recorded filter; the broker does
                        // not remember subscriptions across sessions.
                        for filter in subscriptions.read().await.iter() {
                            if let Err(e) = task_client
                                .subscribe(filter.clone(), QoS::AtLeastOnce)
                                .await
                            {
                                warn!(filter = %filter, error = %e, "Failed to replay subscription");
                            }
                        }

                        if event_tx.send(SessionEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, bytes = publish.payload.len(), "Inbound message");
                        let event = SessionEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if event_tx.send(event).await.is_err() {
                            // Consumer gone, stop polling
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        state_tx.send_replace(ConnectionState::Disconnected);
                        warn!(error = %e, "MQTT connection lost");
                        let _ = event_tx
                            .send(SessionEvent::Disconnected {
                                reason: e.to_string(),
                            })
                            .await;
                        // Retry policy belongs to the caller
                        break;
                    }
                }
            }
        });

        self.client = Some(client);
        self.poll_task = Some(task);

        // Wait for the handshake to resolve either way
        let mut state_rx = self.state_tx.subscribe();
        let timeout = Duration::from_secs(self.config.connect_timeout_seconds);
        let wait = async {
            loop {
                match *state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => {
                        return Err(SessionError::ConnectFailed(
                            addr.clone(),
                            "broker refused or closed the connection".to_string(),
                        ))
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(SessionError::ConnectFailed(
                        addr.clone(),
                        "session dropped".to_string(),
                    ));
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                self.teardown().await;
                Err(SessionError::ConnectTimeout(addr))
            }
        }
    }

    /// Record a topic filter and subscribe when connected.
    ///
    /// Idempotent; filters recorded while disconnected are applied on
    /// the next (re)connect.
    pub async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        {
            let mut subs = self.subscriptions.write().await;
            if !subs.iter().any(|f| f == filter) {
                subs.push(filter.to_string());
            }
        }

        if self.state() == ConnectionState::Connected {
            if let Some(client) = &self.client {
                client.subscribe(filter, QoS::AtLeastOnce).await?;
                info!(filter = %filter, "Subscribed");
            }
        }
        Ok(())
    }

    /// Publish a payload. Success means the message was handed to the
    /// client for sending, not end-to-end delivery.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), SessionError> {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let client = self.client.as_ref().ok_or(SessionError::NotConnected)?;
        client.publish(topic, qos, false, payload).await?;
        Ok(())
    }

    /// Tear down the current client and poll task, releasing the socket.
    async fn teardown(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

#[async_trait]
impl Transport for MqttSession {
    /// Commands go out at QoS 1.
    async fn publish_command(&mut self, command: &ActuatorCommand) -> Result<(), SessionError> {
        let topic = self.config.command_topic(command.actuator);
        let payload = serde_json::to_vec(command)?;
        self.publish(&topic, payload, QoS::AtLeastOnce).await
    }

    /// Alerts go out at QoS 2, elevated assurance relative to sensor
    /// and command traffic.
    async fn publish_alert(&mut self, alert: &Alert) -> Result<(), SessionError> {
        let topic = self.config.alert_topic.clone();
        let payload = serde_json::to_vec(alert)?;
        self.publish(&topic, payload, QoS::ExactlyOnce).await
    }

    async fn disconnect(&mut self) {
        info!("Disconnecting MQTT session");
        self.teardown().await;
    }
}
