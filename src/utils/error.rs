use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("CRC checksum mismatch (expected 0x{expected:04X}, got 0x{received:04X})")]
    CrcError { expected: u16, received: u16 },

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("Device returned exception code 0x{code:02X} for function 0x{function:02X}")]
    ExceptionResponse { function: u8, code: u8 },

    #[error("Unknown register name: {0}")]
    UnknownRegister(String),

    #[error("Register table has {available} entries from '{start}', {requested} requested")]
    RegisterRangeExceeded {
        start: String,
        requested: usize,
        available: usize,
    },

    #[error("Invalid register table: {0}")]
    InvalidTable(String),

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Timeout occurred")]
    Timeout,
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            ModbusError::Timeout
        } else {
            ModbusError::CommunicationError(format!("IO error: {}", err))
        }
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        ModbusError::ConnectionError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor read failed on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sensor returned unparsable value '{value}' from {path}")]
    Parse { path: String, value: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid metrics endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Metrics credentials are not configured")]
    MissingCredentials,

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
