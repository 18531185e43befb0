//! SQLite-backed persistence for readings, actuator events and alerts.
//!
//! All writes are fire-and-forget from the automation loop's point of
//! view: a failed call is logged by the caller and retried naturally on
//! the next scheduled tick.

use crate::engine::{PersistenceGateway, Statistics};
use crate::event::{ActuatorKind, Alert};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Reading/event/alert store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE sensor_readings (
///     id INTEGER PRIMARY KEY,
///     temperature REAL NOT NULL,
///     humidity REAL NOT NULL,
///     light_level REAL NOT NULL,
///     recorded_at TEXT NOT NULL       -- ISO 8601 timestamp
/// );
/// CREATE TABLE actuator_events (
///     id INTEGER PRIMARY KEY,
///     actuator_type TEXT NOT NULL,    -- "fan" | "light"
///     action TEXT NOT NULL,           -- "on" | "off"
///     auto_triggered INTEGER NOT NULL,
///     recorded_at TEXT NOT NULL
/// );
/// CREATE TABLE alerts (
///     id INTEGER PRIMARY KEY,
///     alert_type TEXT NOT NULL,
///     message TEXT NOT NULL,
///     value REAL NOT NULL,
///     acknowledged INTEGER NOT NULL DEFAULT 0,
///     recorded_at TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// The connection is wrapped in a Mutex; SQLite itself runs in
/// serialized mode.
pub struct ReadingStore {
    conn: Mutex<Connection>,
}

impl ReadingStore {
    /// Creates or opens the store, initializing the schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_readings (
                id INTEGER PRIMARY KEY,
                temperature REAL NOT NULL,
                humidity REAL NOT NULL,
                light_level REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS actuator_events (
                id INTEGER PRIMARY KEY,
                actuator_type TEXT NOT NULL,
                action TEXT NOT NULL,
                auto_triggered INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY,
                alert_type TEXT NOT NULL,
                message TEXT NOT NULL,
                value REAL NOT NULL,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_readings_recorded_at
                ON sensor_readings(recorded_at);
            "#,
        )
        .context("Failed to create schema")?;
        Ok(())
    }
}

impl PersistenceGateway for ReadingStore {
    fn save_sensor_reading(
        &self,
        temperature: f64,
        humidity: f64,
        light_level: f64,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sensor_readings (temperature, humidity, light_level, recorded_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![temperature, humidity, light_level, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert sensor reading")?;
        Ok(conn.last_insert_rowid())
    }

    fn save_actuator_event(
        &self,
        actuator: ActuatorKind,
        action: &str,
        auto_triggered: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO actuator_events (actuator_type, action, auto_triggered, recorded_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                actuator.as_str(),
                action,
                auto_triggered,
                Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to insert actuator event")?;
        Ok(conn.last_insert_rowid())
    }

    fn save_alert(&self, alert: &Alert) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO alerts (alert_type, message, value, recorded_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                alert.kind.as_str(),
                alert.message,
                alert.value,
                Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to insert alert")?;
        Ok(conn.last_insert_rowid())
    }

    fn statistics(&self) -> Result<Statistics> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT COUNT(*),
                   AVG(temperature), MIN(temperature), MAX(temperature),
                   AVG(humidity)
            FROM sensor_readings
            "#,
            [],
            |row| {
                Ok(Statistics {
                    total_readings: row.get::<_, i64>(0)? as u64,
                    avg_temperature: row.get(1)?,
                    min_temperature: row.get(2)?,
                    max_temperature: row.get(3)?,
                    avg_humidity: row.get(4)?,
                })
            },
        )
        .context("Failed to query statistics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AlertKind;

    #[test]
    fn test_save_and_count_readings() {
        let store = ReadingStore::in_memory().unwrap();

        let id1 = store.save_sensor_reading(22.0, 50.0, 400.0).unwrap();
        let id2 = store.save_sensor_reading(24.0, 60.0, 200.0).unwrap();
        assert!(id2 > id1);

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_readings, 2);
        assert_eq!(stats.avg_temperature, Some(23.0));
        assert_eq!(stats.min_temperature, Some(22.0));
        assert_eq!(stats.max_temperature, Some(24.0));
        assert_eq!(stats.avg_humidity, Some(55.0));
    }

    #[test]
    fn test_statistics_on_empty_store() {
        let store = ReadingStore::in_memory().unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_readings, 0);
        assert_eq!(stats.avg_temperature, None);
    }

    #[test]
    fn test_save_actuator_event_and_alert() {
        let store = ReadingStore::in_memory().unwrap();

        store
            .save_actuator_event(ActuatorKind::Fan, "on", true)
            .unwrap();
        store
            .save_alert(&Alert::new(AlertKind::HumidityHigh, "High humidity: 85.0%", 85.0))
            .unwrap();

        let conn = store.conn.lock().unwrap();
        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM actuator_events", [], |r| r.get(0))
            .unwrap();
        let alerts: i64 = conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(events, 1);
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abode.db");

        {
            let store = ReadingStore::new(&path).unwrap();
            store.save_sensor_reading(20.0, 40.0, 300.0).unwrap();
        }

        let store = ReadingStore::new(&path).unwrap();
        assert_eq!(store.statistics().unwrap().total_readings, 1);
    }
}
