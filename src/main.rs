use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;

use power_telemetry::cli::commands::{environment_sensor, metrics_sender, open_meter};
use power_telemetry::cli::{build_cli, handle_subcommands};
use power_telemetry::config::{Config, DEFAULT_CONFIG_PATH};
use power_telemetry::services::acquisition::WatchdogFeed;
use power_telemetry::services::{
    AcquisitionLoop, HardwareWatchdog, LinuxWatchdog, LoopSettings, NoHardwareWatchdog, NoIndicator, ProcessReset,
    SnapshotPublisher, SnapshotReader, StatusIndicator, SysfsLed, SystemReset, WatchdogCoordinator,
};

fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level));

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let mut config = Config::load(config_path)?;
    config.apply_matches(&matches)?;

    info!("🚀 power-telemetry v{}", power_telemetry::VERSION);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        if handle_subcommands(&matches, &config).await? {
            return Ok(());
        }
        run_node(config, matches.get_flag("dry-run")).await
    })
}

async fn run_node(config: Config, dry_run: bool) -> Result<()> {
    let reset: Arc<dyn SystemReset> = Arc::new(ProcessReset);

    let hardware: Box<dyn HardwareWatchdog> = match &config.node.hardware_watchdog {
        Some(path) => Box::new(
            LinuxWatchdog::open(path).with_context(|| format!("failed to open hardware watchdog {}", path))?,
        ),
        None => {
            warn!("⚠️  No hardware watchdog configured, relying on the software timer only");
            Box::new(NoHardwareWatchdog)
        }
    };
    let watchdog = WatchdogCoordinator::new(
        config.watchdog_duration(),
        WatchdogCoordinator::DEFAULT_RESOLUTION,
        hardware,
        Arc::clone(&reset),
    );
    watchdog.spawn().context("failed to start watchdog thread")?;
    info!("🐕 Watchdog armed: {}s budget", watchdog.timeout().as_secs());

    let meter = open_meter(&config)?;
    let sender = metrics_sender(&config, dry_run).context("failed to set up the metrics sender")?;
    info!("📡 Metrics via {} to {}", sender.sender_type(), sender.destination());

    let indicator: Box<dyn StatusIndicator> = match &config.node.status_led {
        Some(led) => Box::new(SysfsLed::new(led)),
        None => Box::new(NoIndicator::default()),
    };

    let (snapshot, reader) = SnapshotPublisher::new();
    let feed: Arc<dyn WatchdogFeed> = watchdog;

    let mut acquisition = AcquisitionLoop::new(
        LoopSettings::from(&config),
        environment_sensor(&config),
        meter,
        sender,
        feed,
        reset,
        indicator,
        snapshot,
    );

    tokio::select! {
        _ = acquisition.run() => {}
        _ = trace_snapshots(reader) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("🛑 Shutdown requested");
        }
    }
    Ok(())
}

async fn trace_snapshots(mut reader: SnapshotReader) {
    while reader.changed().await.is_ok() {
        let current = reader.borrow_and_update().to_json();
        debug!("📋 Last readings: {}", current);
    }
}
