pub mod error;

pub use error::{ConfigError, ModbusError, SensorError, TransportError};
