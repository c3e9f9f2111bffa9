pub mod client;
pub mod crc;
pub mod protocol;

pub use client::{ModbusClient, RegisterTransport};
pub use crc::crc16_modbus;
pub use protocol::{FunctionCode, ReadRequest};
