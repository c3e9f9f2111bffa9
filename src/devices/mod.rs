pub mod environment;
pub mod power_meter;
pub mod registers;

pub use environment::{EnvironmentReading, EnvironmentSensor, IioEnvironmentSensor};
pub use power_meter::{PowerMeter, Reading};
pub use registers::{Register, RegisterTable};
