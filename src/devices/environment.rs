use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::utils::error::SensorError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    /// Uncalibrated ADC count of the gas sensor, when one is wired.
    pub gas_raw: Option<u32>,
}

/// Temperature/humidity (and optional gas) capture.
#[async_trait]
pub trait EnvironmentSensor: Send + Sync {
    async fn read(&self) -> Result<EnvironmentReading, SensorError>;
}

/// DHT11/DHT22 exposed by the kernel `dht11` IIO driver.
///
/// The driver reports milli-degrees Celsius and milli-percent relative
/// humidity. A gas sensor behind an IIO ADC is read as a raw count.
pub struct IioEnvironmentSensor {
    device_dir: PathBuf,
    gas_channel: Option<PathBuf>,
}

impl IioEnvironmentSensor {
    pub fn new<P: AsRef<Path>>(device_dir: P) -> Self {
        Self {
            device_dir: device_dir.as_ref().to_path_buf(),
            gas_channel: None,
        }
    }

    pub fn with_gas_channel<P: AsRef<Path>>(mut self, channel: P) -> Self {
        self.gas_channel = Some(channel.as_ref().to_path_buf());
        self
    }

    async fn read_value(path: &Path) -> Result<i64, SensorError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| SensorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        raw.trim().parse::<i64>().map_err(|_| SensorError::Parse {
            path: path.display().to_string(),
            value: raw.trim().to_string(),
        })
    }
}

#[async_trait]
impl EnvironmentSensor for IioEnvironmentSensor {
    async fn read(&self) -> Result<EnvironmentReading, SensorError> {
        let temperature = Self::read_value(&self.device_dir.join("in_temp_input")).await?;
        let humidity = Self::read_value(&self.device_dir.join("in_humidityrelative_input")).await?;

        let gas_raw = match &self.gas_channel {
            Some(channel) => {
                let value = Self::read_value(channel).await?;
                Some(u32::try_from(value).map_err(|_| SensorError::Parse {
                    path: channel.display().to_string(),
                    value: value.to_string(),
                })?)
            }
            None => None,
        };

        let reading = EnvironmentReading {
            temperature_c: temperature as f32 / 1000.0,
            humidity_pct: humidity as f32 / 1000.0,
            gas_raw,
        };
        debug!("🌡️  Environment: {:?}", reading);
        Ok(reading)
    }
}
