//! Most recent readings and send outcomes, handed to the status page.
//!
//! The acquisition loop is the only writer. Each cycle publishes a fresh copy
//! through a `watch` channel, so readers never observe a half-updated cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub data: Option<Value>,
    /// `"<code> <reason>"` of the last push.
    pub sent: Option<String>,
    /// Why the last read or push failed.
    pub exc: Option<String>,
}

impl ChannelSnapshot {
    pub fn record_data(&mut self, data: Value) {
        self.data = Some(data);
    }

    pub fn record_sent(&mut self, status: impl Into<String>) {
        self.sent = Some(status.into());
        self.exc = None;
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.sent = None;
        self.exc = Some(reason.into());
    }

    fn write_into(&self, prefix: &str, map: &mut Map<String, Value>) {
        map.insert(format!("{}_data", prefix), self.data.clone().unwrap_or(Value::Null));
        if let Some(sent) = &self.sent {
            map.insert(format!("{}_data_sent", prefix), Value::String(sent.clone()));
        }
        if let Some(exc) = &self.exc {
            map.insert(format!("{}_data_exc", prefix), Value::String(exc.clone()));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LastReadings {
    pub env: ChannelSnapshot,
    pub power: ChannelSnapshot,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LastReadings {
    /// Flat key layout consumed by the status page.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        self.env.write_into("env", &mut map);
        self.power.write_into("power", &mut map);
        if let Some(updated_at) = self.updated_at {
            map.insert("updated_at".to_string(), Value::String(updated_at.to_rfc3339()));
        }
        Value::Object(map)
    }
}

pub type SnapshotReader = watch::Receiver<LastReadings>;

pub struct SnapshotPublisher {
    tx: watch::Sender<LastReadings>,
}

impl SnapshotPublisher {
    pub fn new() -> (Self, SnapshotReader) {
        let (tx, rx) = watch::channel(LastReadings::default());
        (Self { tx }, rx)
    }

    pub fn publish(&self, mut readings: LastReadings) {
        readings.updated_at = Some(Utc::now());
        self.tx.send_replace(readings);
    }

    pub fn current(&self) -> LastReadings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotReader {
        self.tx.subscribe()
    }
}
