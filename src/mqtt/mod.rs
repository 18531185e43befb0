// MQTT transport session

mod session;

pub use session::{ConnectionState, MqttConfig, MqttSession, SessionError, SessionEvent};
