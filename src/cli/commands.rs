use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};
use std::sync::Arc;

use crate::config::{Config, ConfigStore, DEFAULT_CONFIG_PATH};
use crate::devices::{EnvironmentSensor, IioEnvironmentSensor, PowerMeter};
use crate::modbus::ModbusClient;
use crate::output::line_protocol::{build_line, Fields, Tags};
use crate::output::{ConsoleSender, HttpMetricsSender, MetricsSender, UnconfiguredSender};
use crate::utils::error::{ModbusError, TransportError};

pub const CONNECTIVITY_TEST_MEASUREMENT: &str = "connectivity_test";

pub fn build_cli() -> Command {
    Command::new("power-telemetry")
        .version(crate::VERSION)
        .about("Three-phase power meter and environment telemetry node")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file")
                .default_value(DEFAULT_CONFIG_PATH)
                .global(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("DEVICE")
                .help("Serial port of the RS485 adapter (overrides node.serial_port)")
                .global(true),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Seconds between acquisition cycles (overrides send_metrics_interval)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log Modbus frames and payloads")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Print payloads instead of pushing them")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("run").about("Run the acquisition loop (default)"))
        .subcommand(
            Command::new("read")
                .about("Read a single meter register")
                .arg(Arg::new("register").required(true).help("Register name, e.g. frequency")),
        )
        .subcommand(
            Command::new("read-multiple")
                .about("Read consecutive meter registers in one request")
                .arg(Arg::new("start").required(true).help("First register name"))
                .arg(
                    Arg::new("count")
                        .required(true)
                        .value_parser(value_parser!(usize))
                        .help("Number of values"),
                ),
        )
        .subcommand(Command::new("env").about("Read the environmental sensor once"))
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(Arg::new("key").help("Print only this key, e.g. meter_address")),
        )
        .subcommand(
            Command::new("line")
                .about("Encode a connectivity test line")
                .arg(
                    Arg::new("counter")
                        .value_parser(value_parser!(u64))
                        .default_value("0")
                        .help("Value of the test field"),
                )
                .arg(
                    Arg::new("send")
                        .long("send")
                        .action(ArgAction::SetTrue)
                        .help("Push the line to the metrics instance"),
                ),
        )
}

pub fn open_meter(config: &Config) -> Result<PowerMeter, ModbusError> {
    let client = ModbusClient::new(
        &config.node.serial_port,
        config.node.baud_rate,
        config.meter_parity,
        config.serial_timeout(),
    )?;
    Ok(PowerMeter::dts6619(config.meter_address, Arc::new(client)))
}

pub fn environment_sensor(config: &Config) -> Option<Box<dyn EnvironmentSensor>> {
    let path = config.node.environment_sensor_path.as_ref()?;
    let sensor = match &config.node.gas_channel {
        Some(channel) => IioEnvironmentSensor::new(path).with_gas_channel(channel),
        None => IioEnvironmentSensor::new(path),
    };
    info!("🌡️  Environmental sensor: {}", path);
    Some(Box::new(sensor))
}

/// Picks the sender for this run. `dry_run` prints payloads. Without
/// credentials a node in setup mode gets a sender that fails every push; a
/// node with connectivity configured refuses to start.
pub fn metrics_sender(
    config: &Config,
    dry_run: bool,
) -> Result<Box<dyn MetricsSender>, TransportError> {
    if dry_run {
        info!("🖨️  Dry run, printing payloads instead of sending");
        return Ok(Box::new(ConsoleSender));
    }
    match HttpMetricsSender::from_config(config) {
        Ok(sender) => Ok(Box::new(sender)),
        Err(TransportError::MissingCredentials) if !config.connectivity_configured() => {
            warn!("⚠️  No metrics credentials configured, every push will fail until they are set");
            Ok(Box::new(UnconfiguredSender))
        }
        Err(e) => Err(e),
    }
}

pub fn connectivity_test_line(config: &Config, counter: u64) -> String {
    build_line(
        CONNECTIVITY_TEST_MEASUREMENT,
        &Tags::new().with("place", &config.deployment_location),
        &Fields::new().with("counter", counter),
        None,
    )
}

/// Runs a one-shot subcommand. Returns `false` when the acquisition loop
/// should start instead.
pub async fn handle_subcommands(matches: &ArgMatches, config: &Config) -> anyhow::Result<bool> {
    match matches.subcommand() {
        None | Some(("run", _)) => Ok(false),

        Some(("read", sub)) => {
            let register = sub.get_one::<String>("register").map(String::as_str).unwrap_or_default();
            let meter = open_meter(config)?;
            let value = meter.read(register).await?;
            println!("{}: {}", register, value);
            Ok(true)
        }

        Some(("read-multiple", sub)) => {
            let start = sub.get_one::<String>("start").map(String::as_str).unwrap_or_default();
            let count = sub.get_one::<usize>("count").copied().unwrap_or(1);
            let meter = open_meter(config)?;
            let reading = meter.read_multiple(start, count).await?;
            for (name, value) in reading.iter() {
                println!("{}: {}", name, value);
            }
            Ok(true)
        }

        Some(("env", _)) => {
            let sensor = environment_sensor(config)
                .ok_or_else(|| anyhow::anyhow!("node.environment_sensor_path is not configured"))?;
            let reading = sensor.read().await?;
            println!("{}", serde_json::to_string_pretty(&reading)?);
            Ok(true)
        }

        Some(("config", sub)) => {
            if let Some(name) = sub.get_one::<String>("key") {
                let (key, description, value) = config.describe_key(name)?;
                println!("{:<24} {:<24} {}", key, value, description);
                return Ok(true);
            }
            for (key, description, value) in config.describe() {
                println!("{:<24} {:<24} {}", key, value, description);
            }
            info!("🔧 {} keys", config.get_all().len());
            Ok(true)
        }

        Some(("line", sub)) => {
            let counter = sub.get_one::<u64>("counter").copied().unwrap_or_default();
            let line = connectivity_test_line(config, counter);
            println!("{}", line);

            if sub.get_flag("send") {
                let sender = metrics_sender(config, sub.get_flag("dry-run"))?;
                info!("📡 Sending test line via {} to {}", sender.sender_type(), sender.destination());
                let status = sender.send(&line).await?;
                println!("{}", status);
            }
            Ok(true)
        }

        Some((other, _)) => Err(anyhow::anyhow!("unknown subcommand '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ConfigError;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn global_overrides_apply_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["power-telemetry", "config", "--port", "/dev/ttyAMA0", "--interval", "15"])
            .unwrap();

        let mut config = Config::default();
        config.apply_matches(&matches).unwrap();
        assert_eq!(config.node.serial_port, "/dev/ttyAMA0");
        assert_eq!(config.send_metrics_interval, 15);
    }

    #[tokio::test]
    async fn config_rejects_unknown_key() {
        let matches = build_cli()
            .try_get_matches_from(["power-telemetry", "config", "favourite_colour"])
            .unwrap();
        let error = handle_subcommands(&matches, &Config::default()).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownKey(name)) if name == "favourite_colour"
        ));
    }

    #[tokio::test]
    async fn config_prints_a_known_key() {
        let matches = build_cli()
            .try_get_matches_from(["power-telemetry", "config", "meter_address"])
            .unwrap();
        assert!(handle_subcommands(&matches, &Config::default()).await.unwrap());
    }

    #[test]
    fn read_multiple_parses_count() {
        let matches = build_cli()
            .try_get_matches_from(["power-telemetry", "read-multiple", "line_a_voltage", "3"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<usize>("count"), Some(&3));
    }

    #[test]
    fn test_line_is_tagged_with_location() {
        let config = Config {
            deployment_location: "garage".to_string(),
            ..Config::default()
        };
        assert_eq!(connectivity_test_line(&config, 7), "connectivity_test,place=garage counter=7");
    }

    #[test]
    fn dry_run_prints_payloads() {
        let sender = metrics_sender(&Config::default(), true).unwrap();
        assert_eq!(sender.sender_type(), "console");
    }

    #[tokio::test]
    async fn setup_mode_without_credentials_fails_every_push() {
        let sender = metrics_sender(&Config::default(), false).unwrap();
        assert_eq!(sender.sender_type(), "unconfigured");
        assert!(matches!(
            sender.send("test value=1").await,
            Err(TransportError::MissingCredentials)
        ));
    }

    #[test]
    fn connectivity_without_credentials_refuses_to_start() {
        let config = Config {
            wlan_ssid: Some("plant-floor".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            metrics_sender(&config, false),
            Err(TransportError::MissingCredentials)
        ));
    }

    #[test]
    fn dry_run_flag_is_global() {
        let matches = build_cli()
            .try_get_matches_from(["power-telemetry", "line", "3", "--send", "--dry-run"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert!(sub.get_flag("dry-run"));
        assert!(sub.get_flag("send"));
    }

    #[test]
    fn sensor_is_optional() {
        assert!(environment_sensor(&Config::default()).is_none());
    }

    #[tokio::test]
    async fn run_is_the_default_command() {
        let matches = build_cli().try_get_matches_from(["power-telemetry"]).unwrap();
        assert!(!handle_subcommands(&matches, &Config::default()).await.unwrap());
    }
}
