use log::{debug, error, info, warn};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use super::indicator::StatusIndicator;
use super::snapshot::{LastReadings, SnapshotPublisher};
use super::watchdog::{ResetReason, SystemReset, WatchdogCoordinator};
use crate::config::Config;
use crate::devices::{EnvironmentReading, EnvironmentSensor, PowerMeter, Reading};
use crate::output::line_protocol::{build_line, build_lines_multi, join_lines, Fields, GroupedFields, Tags};
use crate::output::{MetricsSender, SendStatus};

pub const ENVIRONMENT_MEASUREMENT: &str = "environment";
pub const POWER_MEASUREMENT: &str = "power";

/// Snapshot reason for a node without an environmental sensor.
pub const NO_ENVIRONMENT_SENSOR: &str = "no environmental sensor configured";

/// Longest single suspension while idling between cycles.
pub const SLEEP_STEP: Duration = Duration::from_secs(1);

/// Anything the loop can keep alive by feeding.
pub trait WatchdogFeed: Send + Sync {
    fn feed(&self);
}

impl WatchdogFeed for WatchdogCoordinator {
    fn feed(&self) {
        WatchdogCoordinator::feed(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Environment,
    Power,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Environment => write!(f, "environmental"),
            Channel::Power => write!(f, "power"),
        }
    }
}

/// Consecutive failed sends per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounters {
    environment: u32,
    power: u32,
}

impl FailureCounters {
    pub fn get(&self, channel: Channel) -> u32 {
        match channel {
            Channel::Environment => self.environment,
            Channel::Power => self.power,
        }
    }

    fn slot(&mut self, channel: Channel) -> &mut u32 {
        match channel {
            Channel::Environment => &mut self.environment,
            Channel::Power => &mut self.power,
        }
    }

    pub fn record_success(&mut self, channel: Channel) {
        *self.slot(channel) = 0;
    }

    pub fn record_failure(&mut self, channel: Channel) -> u32 {
        let slot = self.slot(channel);
        *slot = slot.saturating_add(1);
        *slot
    }

    /// First channel whose count has reached `threshold`.
    pub fn exceeding(&self, threshold: u32) -> Option<(Channel, u32)> {
        [Channel::Environment, Channel::Power]
            .into_iter()
            .map(|channel| (channel, self.get(channel)))
            .find(|(_, failures)| *failures >= threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Start,
    ReadEnv,
    ReadPower,
    SendEnv,
    SendPower,
    Sleep,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStep::Start => "START",
            CycleStep::ReadEnv => "READ_ENV",
            CycleStep::ReadPower => "READ_POWER",
            CycleStep::SendEnv => "SEND_ENV",
            CycleStep::SendPower => "SEND_POWER",
            CycleStep::Sleep => "SLEEP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(SendStatus),
    /// Server answered with a non-2xx status.
    Rejected(SendStatus),
    Failed(String),
    /// No data this cycle, including a channel with no sensor wired.
    /// Counts as a failure.
    Skipped,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub environment: SendOutcome,
    pub power: SendOutcome,
    pub counters: FailureCounters,
    pub reset: Option<ResetReason>,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    pub failure_threshold: u32,
    pub connectivity_configured: bool,
    pub location: String,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.send_interval(),
            failure_threshold: config.node.failure_threshold,
            connectivity_configured: config.connectivity_configured(),
            location: config.deployment_location.clone(),
        }
    }
}

pub struct AcquisitionLoop {
    settings: LoopSettings,
    environment: Option<Box<dyn EnvironmentSensor>>,
    meter: PowerMeter,
    sender: Box<dyn MetricsSender>,
    watchdog: Arc<dyn WatchdogFeed>,
    reset: Arc<dyn SystemReset>,
    indicator: Box<dyn StatusIndicator>,
    snapshot: SnapshotPublisher,
    counters: FailureCounters,
}

impl AcquisitionLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: LoopSettings,
        environment: Option<Box<dyn EnvironmentSensor>>,
        meter: PowerMeter,
        sender: Box<dyn MetricsSender>,
        watchdog: Arc<dyn WatchdogFeed>,
        reset: Arc<dyn SystemReset>,
        indicator: Box<dyn StatusIndicator>,
        snapshot: SnapshotPublisher,
    ) -> Self {
        Self {
            settings,
            environment,
            meter,
            sender,
            watchdog,
            reset,
            indicator,
            snapshot,
            counters: FailureCounters::default(),
        }
    }

    pub fn counters(&self) -> FailureCounters {
        self.counters
    }

    fn tags(&self) -> Tags {
        Tags::new().with("place", &self.settings.location)
    }

    fn enter(&self, step: CycleStep) {
        debug!("🔁 {}", step);
        self.watchdog.feed();
    }

    /// Runs cycles until a reset is requested.
    pub async fn run(&mut self) {
        info!(
            "🚀 Acquisition loop started: every {:?}, reset after {} failed sends{}",
            self.settings.interval,
            self.settings.failure_threshold,
            if self.settings.connectivity_configured { "" } else { " (disabled in setup mode)" }
        );

        loop {
            let started = Instant::now();
            let report = self.run_cycle().await;
            if report.reset.is_some() {
                return;
            }
            self.sleep_remaining(started).await;
        }
    }

    /// One pass of START → READ_ENV → READ_POWER → SEND_ENV → SEND_POWER.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut readings = LastReadings::default();

        self.enter(CycleStep::Start);
        self.indicator.set(true);

        self.enter(CycleStep::ReadEnv);
        let env_data = self.read_environment(&mut readings).await;

        self.enter(CycleStep::ReadPower);
        let power_data = self.read_power(&mut readings).await;
        self.snapshot.publish(readings.clone());

        self.enter(CycleStep::SendEnv);
        let environment = match env_data {
            Some(reading) => {
                let payload = self.environment_payload(&reading);
                self.send(Channel::Environment, &payload).await
            }
            None => SendOutcome::Skipped,
        };
        self.account(Channel::Environment, &environment, &mut readings);

        self.enter(CycleStep::SendPower);
        let power = match power_data {
            Some(reading) => {
                let payload = self.power_payload(&reading);
                self.send(Channel::Power, &payload).await
            }
            None => SendOutcome::Skipped,
        };
        self.account(Channel::Power, &power, &mut readings);
        self.snapshot.publish(readings);

        let reset = self.check_failure_threshold();
        self.indicator.set(false);

        CycleReport {
            environment,
            power,
            counters: self.counters,
            reset,
        }
    }

    async fn read_environment(&self, readings: &mut LastReadings) -> Option<EnvironmentReading> {
        let Some(sensor) = self.environment.as_ref() else {
            warn!("⚠️  No environmental sensor configured");
            readings.env.record_failure(NO_ENVIRONMENT_SENSOR);
            return None;
        };
        match sensor.read().await {
            Ok(reading) => {
                info!(
                    "🌡️  {:.1}°C {:.1}%RH{}",
                    reading.temperature_c,
                    reading.humidity_pct,
                    reading.gas_raw.map(|gas| format!(" gas={}", gas)).unwrap_or_default()
                );
                readings.env.record_data(serde_json::to_value(&reading).unwrap_or(Value::Null));
                Some(reading)
            }
            Err(e) => {
                error!("❌ Environmental read failed: {}", e);
                readings.env.record_failure(e.to_string());
                None
            }
        }
    }

    async fn read_power(&self, readings: &mut LastReadings) -> Option<Reading> {
        match self.meter.read_all().await {
            Ok(reading) => {
                info!(
                    "⚡ {} values from meter {}, total {} W",
                    reading.len(),
                    self.meter.slave_id(),
                    reading.get("total_active_power").map(|v| v.to_string()).unwrap_or_else(|| "?".into())
                );
                readings.power.record_data(reading.to_json());
                Some(reading)
            }
            Err(e) => {
                error!("❌ Power meter read failed: {}", e);
                readings.power.record_failure(e.to_string());
                None
            }
        }
    }

    pub fn environment_payload(&self, reading: &EnvironmentReading) -> String {
        let mut fields = Fields::new()
            .with("temp", reading.temperature_c)
            .with("humidity", reading.humidity_pct);
        if let Some(gas) = reading.gas_raw {
            fields.push("gas_raw", gas);
        }
        build_line(ENVIRONMENT_MEASUREMENT, &self.tags(), &fields, None)
    }

    pub fn power_payload(&self, reading: &Reading) -> String {
        join_lines(&build_lines_multi(POWER_MEASUREMENT, &self.tags(), &group_by_line(reading)))
    }

    async fn send(&self, channel: Channel, payload: &str) -> SendOutcome {
        match self.sender.send(payload).await {
            Ok(status) if status.is_success() => {
                info!("✅ Sent {} data: {}", channel, status);
                SendOutcome::Sent(status)
            }
            Ok(status) => {
                warn!("⚠️  {} data rejected: {}", channel, status);
                SendOutcome::Rejected(status)
            }
            Err(e) => {
                error!("❌ Sending {} data failed: {}", channel, e);
                SendOutcome::Failed(e.to_string())
            }
        }
    }

    fn account(&mut self, channel: Channel, outcome: &SendOutcome, readings: &mut LastReadings) {
        let snapshot = match channel {
            Channel::Environment => &mut readings.env,
            Channel::Power => &mut readings.power,
        };

        match outcome {
            SendOutcome::Sent(status) => {
                self.counters.record_success(channel);
                snapshot.record_sent(status.to_string());
            }
            SendOutcome::Rejected(status) => {
                let failures = self.counters.record_failure(channel);
                snapshot.record_failure(format!("HTTP {}", status));
                warn!("⚠️  {} consecutive {} failures", failures, channel);
            }
            SendOutcome::Failed(reason) => {
                let failures = self.counters.record_failure(channel);
                snapshot.record_failure(reason.clone());
                warn!("⚠️  {} consecutive {} failures", failures, channel);
            }
            SendOutcome::Skipped => {
                let failures = self.counters.record_failure(channel);
                warn!("⚠️  No {} data to send ({} consecutive failures)", channel, failures);
            }
        }
    }

    fn check_failure_threshold(&self) -> Option<ResetReason> {
        if !self.settings.connectivity_configured {
            return None;
        }
        let (channel, failures) = self.counters.exceeding(self.settings.failure_threshold)?;
        let reason = ResetReason::ConsecutiveSendFailures {
            channel: channel.to_string(),
            failures,
        };
        error!("💥 {}", reason);
        self.reset.reset(&reason);
        Some(reason)
    }

    /// Sleeps out the rest of the interval one step at a time, feeding the
    /// watchdog and toggling the indicator after each step. Returns the
    /// number of steps taken.
    pub async fn sleep_remaining(&mut self, cycle_started: Instant) -> u32 {
        self.enter(CycleStep::Sleep);

        let mut remaining = self.settings.interval.saturating_sub(cycle_started.elapsed());
        info!("💤 Sleeping {:.1}s", remaining.as_secs_f32());

        let mut steps = 0;
        while !remaining.is_zero() {
            let step = remaining.min(SLEEP_STEP);
            sleep(step).await;
            remaining -= step;
            steps += 1;

            self.watchdog.feed();
            self.indicator.toggle();
        }
        steps
    }
}

/// Folds `line_<phase>_<quantity>` registers into one per-phase series per
/// quantity; everything else becomes a scalar field.
pub fn group_by_line(reading: &Reading) -> GroupedFields {
    let mut per_line: Vec<(String, Vec<(String, f32)>)> = Vec::new();
    let mut scalars: Vec<(&str, f32)> = Vec::new();

    for (name, value) in reading.iter() {
        let phase = name
            .strip_prefix("line_")
            .and_then(|rest| rest.split_once('_'))
            .filter(|(phase, _)| phase.len() == 1);

        match phase {
            Some((phase, quantity)) => {
                let tag = format!("line={}", phase.to_ascii_uppercase());
                match per_line.iter_mut().find(|(existing, _)| existing == quantity) {
                    Some((_, values)) => values.push((tag, value)),
                    None => per_line.push((quantity.to_string(), vec![(tag, value)])),
                }
            }
            None => scalars.push((name, value)),
        }
    }

    let grouped = per_line
        .into_iter()
        .fold(GroupedFields::new(), |grouped, (quantity, values)| grouped.per_tag(quantity, values));
    scalars
        .into_iter()
        .fold(grouped, |grouped, (name, value)| grouped.scalar(name, value))
}
