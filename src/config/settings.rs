use clap::ArgMatches;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::utils::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "power_telemetry.toml";
pub const DEFAULT_METRICS_INSTANCE: &str =
    "https://influx-prod-06-prod-us-central-0.grafana.net/api/v1/push/influx/write";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

impl ParityConfig {
    pub fn letter(self) -> &'static str {
        match self {
            ParityConfig::None => "N",
            ParityConfig::Even => "E",
            ParityConfig::Odd => "O",
        }
    }
}

impl TryFrom<String> for ParityConfig {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(ParityConfig::None),
            "E" | "EVEN" => Ok(ParityConfig::Even),
            "O" | "ODD" => Ok(ParityConfig::Odd),
            other => Err(format!("unknown parity '{}', expected O, E or N", other)),
        }
    }
}

impl From<ParityConfig> for String {
    fn from(value: ParityConfig) -> Self {
        value.letter().to_string()
    }
}

impl fmt::Display for ParityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Keys of the node's user-facing configuration, in form order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    DeploymentLocation,
    SendMetricsInterval,
    WatchdogTimeout,
    MeterAddress,
    MeterParity,
    MetricsInstance,
    MetricsUsername,
    MetricsPassword,
    WlanSsid,
    WlanPassword,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 10] = [
        ConfigKey::DeploymentLocation,
        ConfigKey::SendMetricsInterval,
        ConfigKey::WatchdogTimeout,
        ConfigKey::MeterAddress,
        ConfigKey::MeterParity,
        ConfigKey::MetricsInstance,
        ConfigKey::MetricsUsername,
        ConfigKey::MetricsPassword,
        ConfigKey::WlanSsid,
        ConfigKey::WlanPassword,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::DeploymentLocation => "deployment_location",
            ConfigKey::SendMetricsInterval => "send_metrics_interval",
            ConfigKey::WatchdogTimeout => "watchdog_timeout",
            ConfigKey::MeterAddress => "meter_address",
            ConfigKey::MeterParity => "meter_parity",
            ConfigKey::MetricsInstance => "metrics_instance",
            ConfigKey::MetricsUsername => "metrics_username",
            ConfigKey::MetricsPassword => "metrics_password",
            ConfigKey::WlanSsid => "wlan_ssid",
            ConfigKey::WlanPassword => "wlan_password",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ConfigKey::DeploymentLocation => "Location tag attached to every metric",
            ConfigKey::SendMetricsInterval => "Seconds between metric pushes",
            ConfigKey::WatchdogTimeout => "Restart after seconds if stuck",
            ConfigKey::MeterAddress => "Address of the power meter",
            ConfigKey::MeterParity => "Letters O=Odd, E=Even, N=None",
            ConfigKey::MetricsInstance => "URL of influx-capable metrics target",
            ConfigKey::MetricsUsername => "",
            ConfigKey::MetricsPassword => "",
            ConfigKey::WlanSsid => "",
            ConfigKey::WlanPassword => "",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == name)
            .ok_or_else(|| ConfigError::UnknownKey(name.to_string()))
    }

    pub fn is_secret(self) -> bool {
        self.name().ends_with("_password")
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Text(String),
    Seconds(u64),
    Address(u8),
    Parity(ParityConfig),
    Unset,
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Text(value) => f.write_str(value),
            ConfigValue::Seconds(value) => write!(f, "{}", value),
            ConfigValue::Address(value) => write!(f, "{}", value),
            ConfigValue::Parity(value) => write!(f, "{}", value),
            ConfigValue::Unset => f.write_str(""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub key: ConfigKey,
    pub description: &'static str,
    pub value: ConfigValue,
}

/// Read-only key/value view of the node configuration.
pub trait ConfigStore {
    fn get(&self, key: ConfigKey) -> ConfigValue;

    fn get_all(&self) -> Vec<ConfigEntry> {
        ConfigKey::ALL
            .into_iter()
            .map(|key| ConfigEntry {
                key,
                description: key.description(),
                value: self.get(key),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub deployment_location: String,
    pub send_metrics_interval: u64,
    pub watchdog_timeout: u64,
    pub meter_address: u8,
    pub meter_parity: ParityConfig,
    pub metrics_instance: String,
    pub metrics_username: Option<String>,
    pub metrics_password: Option<String>,
    pub wlan_ssid: Option<String>,
    pub wlan_password: Option<String>,

    // Hardware wiring of this node, not exposed on the config form
    pub node: NodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub serial_timeout_ms: u64,
    pub failure_threshold: u32,
    pub environment_sensor_path: Option<String>,
    pub gas_channel: Option<String>,
    pub hardware_watchdog: Option<String>,
    pub status_led: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            serial_timeout_ms: 1000,
            failure_threshold: 5,
            environment_sensor_path: None,
            gas_channel: None,
            hardware_watchdog: None,
            status_led: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment_location: "default".to_string(),
            send_metrics_interval: 30,
            watchdog_timeout: 60,
            meter_address: 1,
            meter_parity: ParityConfig::Odd,
            metrics_instance: DEFAULT_METRICS_INSTANCE.to_string(),
            metrics_username: None,
            metrics_password: None,
            wlan_ssid: None,
            wlan_password: None,
            node: NodeConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("⚠️  Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("📄 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Applies command line overrides on top of the loaded file.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), ConfigError> {
        if let Some(port) = matches.get_one::<String>("port") {
            self.node.serial_port = port.clone();
        }
        if let Some(interval) = matches.get_one::<String>("interval") {
            self.send_metrics_interval = interval.parse().map_err(|_| ConfigError::InvalidValue {
                key: ConfigKey::SendMetricsInterval.name().to_string(),
                reason: format!("'{}' is not a number of seconds", interval),
            })?;
        }
        self.validate()
    }

    // Empty strings from hand-edited files mean "not set"
    fn normalize(&mut self) {
        for value in [
            &mut self.metrics_username,
            &mut self.metrics_password,
            &mut self.wlan_ssid,
            &mut self.wlan_password,
        ] {
            if value.as_deref().map(str::trim) == Some("") {
                *value = None;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: ConfigKey, reason: &str| ConfigError::InvalidValue {
            key: key.name().to_string(),
            reason: reason.to_string(),
        };

        if self.send_metrics_interval == 0 {
            return Err(invalid(ConfigKey::SendMetricsInterval, "must be at least 1 second"));
        }
        if self.watchdog_timeout == 0 {
            return Err(invalid(ConfigKey::WatchdogTimeout, "must be at least 1 second"));
        }
        if !(1..=247).contains(&self.meter_address) {
            return Err(invalid(ConfigKey::MeterAddress, "must be within 1..=247"));
        }
        if !self.metrics_instance.starts_with("http://") && !self.metrics_instance.starts_with("https://") {
            return Err(invalid(ConfigKey::MetricsInstance, "must be an http(s) URL"));
        }
        if self.node.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "node.failure_threshold".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_metrics_interval)
    }

    pub fn watchdog_duration(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout)
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.node.serial_timeout_ms)
    }

    /// Whether the node is set up to reach a network at all. Without it the
    /// node runs in local setup mode and send failures are expected.
    pub fn connectivity_configured(&self) -> bool {
        self.wlan_ssid.is_some()
    }

    pub fn metrics_credentials(&self) -> Option<(&str, &str)> {
        match (&self.metrics_username, &self.metrics_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Rendering of `get_all` for logs and the CLI, secrets masked.
    pub fn describe(&self) -> Vec<(String, String, String)> {
        self.get_all()
            .into_iter()
            .map(|entry| describe_entry(entry.key, &entry.value))
            .collect()
    }

    /// Same rendering for a single key looked up by name.
    pub fn describe_key(&self, name: &str) -> Result<(String, String, String), ConfigError> {
        let key = ConfigKey::from_name(name)?;
        Ok(describe_entry(key, &self.get(key)))
    }
}

fn describe_entry(key: ConfigKey, value: &ConfigValue) -> (String, String, String) {
    let value = match (value, key.is_secret()) {
        (ConfigValue::Unset, _) => "<unset>".to_string(),
        (_, true) => "********".to_string(),
        (value, false) => value.to_string(),
    };
    (key.name().to_string(), key.description().to_string(), value)
}

impl ConfigStore for Config {
    fn get(&self, key: ConfigKey) -> ConfigValue {
        let optional = |value: &Option<String>| {
            value.clone().map(ConfigValue::Text).unwrap_or(ConfigValue::Unset)
        };

        match key {
            ConfigKey::DeploymentLocation => ConfigValue::Text(self.deployment_location.clone()),
            ConfigKey::SendMetricsInterval => ConfigValue::Seconds(self.send_metrics_interval),
            ConfigKey::WatchdogTimeout => ConfigValue::Seconds(self.watchdog_timeout),
            ConfigKey::MeterAddress => ConfigValue::Address(self.meter_address),
            ConfigKey::MeterParity => ConfigValue::Parity(self.meter_parity),
            ConfigKey::MetricsInstance => ConfigValue::Text(self.metrics_instance.clone()),
            ConfigKey::MetricsUsername => optional(&self.metrics_username),
            ConfigKey::MetricsPassword => optional(&self.metrics_password),
            ConfigKey::WlanSsid => optional(&self.wlan_ssid),
            ConfigKey::WlanPassword => optional(&self.wlan_password),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.deployment_location, "default");
        assert_eq!(config.send_metrics_interval, 30);
        assert_eq!(config.watchdog_timeout, 60);
        assert_eq!(config.meter_address, 1);
        assert_eq!(config.meter_parity, ParityConfig::Odd);
        assert_eq!(config.node.failure_threshold, 5);
        assert!(!config.connectivity_configured());
    }

    #[test]
    fn parses_typed_values() {
        let config = Config::from_toml(
            r#"
            deployment_location = "workshop"
            send_metrics_interval = 10
            meter_address = 51
            meter_parity = "e"
            metrics_username = "12345"
            metrics_password = "secret"
            wlan_ssid = "barn"

            [node]
            serial_port = "/dev/ttyAMA0"
            failure_threshold = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.get(ConfigKey::DeploymentLocation), ConfigValue::Text("workshop".into()));
        assert_eq!(config.get(ConfigKey::SendMetricsInterval), ConfigValue::Seconds(10));
        assert_eq!(config.get(ConfigKey::MeterAddress), ConfigValue::Address(51));
        assert_eq!(config.get(ConfigKey::MeterParity), ConfigValue::Parity(ParityConfig::Even));
        assert_eq!(config.metrics_credentials(), Some(("12345", "secret")));
        assert_eq!(config.node.serial_port, "/dev/ttyAMA0");
        assert_eq!(config.node.failure_threshold, 3);
        assert!(config.connectivity_configured());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            Config::from_toml("favourite_colour = \"blue\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(Config::from_toml("meter_parity = \"X\""), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Config::from_toml("send_metrics_interval = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::from_toml("meter_address = 0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::from_toml("metrics_instance = \"ftp://example\""),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn empty_strings_are_unset() {
        let config = Config::from_toml("wlan_ssid = \"\"\nmetrics_password = \" \"").unwrap();
        assert_eq!(config.get(ConfigKey::WlanSsid), ConfigValue::Unset);
        assert_eq!(config.get(ConfigKey::MetricsPassword), ConfigValue::Unset);
        assert!(!config.connectivity_configured());
    }

    #[test]
    fn get_all_follows_schema_order_and_masks_secrets() {
        let mut config = Config::default();
        config.metrics_password = Some("hunter2".into());

        let entries = config.get_all();
        let names: Vec<&str> = entries.iter().map(|entry| entry.key.name()).collect();
        assert_eq!(names[0], "deployment_location");
        assert_eq!(names.len(), ConfigKey::ALL.len());
        assert_eq!(entries[2].description, "Restart after seconds if stuck");

        let described = config.describe();
        let password = described.iter().find(|(key, _, _)| key == "metrics_password").unwrap();
        assert_eq!(password.2, "********");
        let user = described.iter().find(|(key, _, _)| key == "metrics_username").unwrap();
        assert_eq!(user.2, "<unset>");
    }

    #[test]
    fn single_key_lookup_masks_secrets() {
        let config = Config {
            send_metrics_interval: 15,
            wlan_password: Some("hunter2".to_string()),
            ..Config::default()
        };
        let (key, _, value) = config.describe_key("send_metrics_interval").unwrap();
        assert_eq!((key.as_str(), value.as_str()), ("send_metrics_interval", "15"));
        assert_eq!(config.describe_key("wlan_password").unwrap().2, "********");
        assert!(matches!(
            config.describe_key("favourite_colour"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn key_names_round_trip() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::from_name(key.name()).unwrap(), key);
        }
        assert!(matches!(ConfigKey::from_name("nope"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn load_reads_file_and_tolerates_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deployment_location = \"garage\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.deployment_location, "garage");

        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.deployment_location, "default");
    }
}
