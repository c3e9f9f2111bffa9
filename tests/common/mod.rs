#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use power_telemetry::devices::registers;
use power_telemetry::devices::{EnvironmentReading, EnvironmentSensor, PowerMeter};
use power_telemetry::modbus::{FunctionCode, RegisterTransport};
use power_telemetry::output::{MetricsSender, SendStatus};
use power_telemetry::services::acquisition::WatchdogFeed;
use power_telemetry::services::{
    AcquisitionLoop, LoopSettings, NoIndicator, ResetReason, SnapshotPublisher, SnapshotReader, SystemReset,
};
use power_telemetry::{ModbusError, SensorError, TransportError};

/// Meter that answers every block with the same value, or not at all.
pub struct ConstantMeter {
    value: f32,
    offline: AtomicBool,
}

impl ConstantMeter {
    pub fn new(value: f32) -> Arc<Self> {
        Arc::new(Self {
            value,
            offline: AtomicBool::new(false),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegisterTransport for ConstantMeter {
    async fn execute(
        &self,
        _slave_id: u8,
        _function: FunctionCode,
        _start_register: u16,
        word_count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ModbusError::Timeout);
        }
        let (high, low) = registers::encode(self.value);
        Ok((0..word_count / 2).flat_map(|_| [high, low]).collect())
    }
}

pub struct FixedSensor {
    pub result: Result<EnvironmentReading, ()>,
}

#[async_trait]
impl EnvironmentSensor for FixedSensor {
    async fn read(&self) -> Result<EnvironmentReading, SensorError> {
        self.result.clone().map_err(|_| SensorError::Parse {
            path: "/sys/bus/iio/devices/iio:device0/in_temp_input".to_string(),
            value: "busy".to_string(),
        })
    }
}

pub fn healthy_sensor() -> Box<dyn EnvironmentSensor> {
    Box::new(FixedSensor {
        result: Ok(EnvironmentReading {
            temperature_c: 21.5,
            humidity_pct: 40.0,
            gas_raw: None,
        }),
    })
}

pub fn broken_sensor() -> Box<dyn EnvironmentSensor> {
    Box::new(FixedSensor { result: Err(()) })
}

/// What the fake endpoint does with one push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Status(u16),
    Unreachable,
}

pub const OK: Reply = Reply::Status(204);
pub const UNAVAILABLE: Reply = Reply::Status(503);
pub const UNREACHABLE_ENDPOINT: &str = "http://10.0.0.1:9/api/v1/push/influx/write";

/// Replies to pushes of one measurement (or all of them) from a queue, then
/// with `fallback`. Pushes of other measurements are accepted.
pub struct Script {
    measurement: Option<&'static str>,
    replies: VecDeque<Reply>,
    fallback: Reply,
}

impl Script {
    pub fn always(reply: Reply) -> Self {
        Self::then(&[], reply)
    }

    pub fn then(replies: &[Reply], fallback: Reply) -> Self {
        Self {
            measurement: None,
            replies: replies.iter().copied().collect(),
            fallback,
        }
    }

    pub fn only_for(mut self, measurement: &'static str) -> Self {
        self.measurement = Some(measurement);
        self
    }

    fn next(&mut self, payload: &str) -> Reply {
        match self.measurement {
            Some(measurement) if !payload.starts_with(&format!("{},", measurement)) => OK,
            _ => self.replies.pop_front().unwrap_or(self.fallback),
        }
    }
}

pub struct ScriptedSender {
    script: Mutex<Script>,
    payloads: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSender {
    pub fn new(script: Script) -> (Box<Self>, Arc<Mutex<Vec<String>>>) {
        let payloads = Arc::new(Mutex::new(Vec::new()));
        let sender = Box::new(Self {
            script: Mutex::new(script),
            payloads: payloads.clone(),
        });
        (sender, payloads)
    }
}

#[async_trait]
impl MetricsSender for ScriptedSender {
    async fn send(&self, payload: &str) -> Result<SendStatus, TransportError> {
        self.payloads.lock().unwrap().push(payload.to_string());
        match self.script.lock().unwrap().next(payload) {
            Reply::Status(204) => Ok(SendStatus::new(204, "No Content")),
            Reply::Status(code) => Ok(SendStatus::new(code, "Service Unavailable")),
            Reply::Unreachable => Err(TransportError::InvalidEndpoint(UNREACHABLE_ENDPOINT.to_string())),
        }
    }

    fn sender_type(&self) -> &str {
        "scripted"
    }

    fn destination(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
pub struct CountingFeed {
    pub feeds: AtomicUsize,
}

impl CountingFeed {
    pub fn count(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }
}

impl WatchdogFeed for CountingFeed {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingReset {
    pub reasons: Mutex<Vec<ResetReason>>,
}

impl RecordingReset {
    pub fn reasons(&self) -> Vec<ResetReason> {
        self.reasons.lock().unwrap().clone()
    }
}

impl SystemReset for RecordingReset {
    fn reset(&self, reason: &ResetReason) {
        self.reasons.lock().unwrap().push(reason.clone());
    }
}

pub fn settings(connectivity_configured: bool) -> LoopSettings {
    LoopSettings {
        interval: Duration::from_secs(10),
        failure_threshold: 5,
        connectivity_configured,
        location: "lab".to_string(),
    }
}

pub struct Harness {
    pub acquisition: AcquisitionLoop,
    pub meter: Arc<ConstantMeter>,
    pub payloads: Arc<Mutex<Vec<String>>>,
    pub feed: Arc<CountingFeed>,
    pub reset: Arc<RecordingReset>,
    pub snapshot: SnapshotReader,
}

pub fn harness(
    settings: LoopSettings,
    sensor: Option<Box<dyn EnvironmentSensor>>,
    script: Script,
) -> Harness {
    let meter = ConstantMeter::new(50.0);
    let (sender, payloads) = ScriptedSender::new(script);
    let feed = Arc::new(CountingFeed::default());
    let reset = Arc::new(RecordingReset::default());
    let (publisher, snapshot) = SnapshotPublisher::new();

    let acquisition = AcquisitionLoop::new(
        settings,
        sensor,
        PowerMeter::dts6619(1, meter.clone()),
        sender,
        feed.clone(),
        reset.clone(),
        Box::new(NoIndicator::default()),
        publisher,
    );

    Harness {
        acquisition,
        meter,
        payloads,
        feed,
        reset,
        snapshot,
    }
}

impl Harness {
    /// Pushes made for `measurement`, whatever their outcome.
    pub fn pushes_of(&self, measurement: &str) -> usize {
        let prefix = format!("{},", measurement);
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .filter(|payload| payload.starts_with(&prefix))
            .count()
    }
}
