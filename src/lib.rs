//! Power and environment telemetry node.
//!
//! Polls a three-phase DTS6619 power meter over Modbus RTU and an optional
//! IIO temperature/humidity sensor, pushes both as Influx line protocol over
//! HTTP, and resets the node when sends keep failing or the acquisition loop
//! stops feeding its watchdog.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ConfigStore};
pub use devices::{EnvironmentSensor, IioEnvironmentSensor, PowerMeter, Reading, RegisterTable};
pub use modbus::{ModbusClient, RegisterTransport};
pub use output::{ConsoleSender, HttpMetricsSender, MetricsSender, SendStatus};
pub use services::{AcquisitionLoop, LoopSettings, SnapshotPublisher, WatchdogCoordinator};
pub use utils::error::{ConfigError, ModbusError, SensorError, TransportError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
