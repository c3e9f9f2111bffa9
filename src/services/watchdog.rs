//! Software watchdog layered over the platform's hardware watchdog.
//!
//! Hardware watchdogs cap their timeout at a few seconds to a minute, which a
//! single slow HTTP push can exceed. The coordinator keeps its own, longer
//! budget and feeds the hardware device on every tick while that budget lasts.
//! Once the budget runs out the hardware device is left unfed and the
//! coordinator requests a reset itself.

use log::{error, info, warn};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Exit status asking the supervisor (systemd `Restart=on-failure`) to restart us.
pub const RESET_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetReason {
    WatchdogExpired { timeout: Duration },
    ConsecutiveSendFailures { channel: String, failures: u32 },
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::WatchdogExpired { timeout } => {
                write!(f, "watchdog not fed for {}s", timeout.as_secs())
            }
            ResetReason::ConsecutiveSendFailures { channel, failures } => {
                write!(f, "{} consecutive failed sends on {} channel", failures, channel)
            }
        }
    }
}

/// Irreversible restart of the node.
pub trait SystemReset: Send + Sync {
    fn reset(&self, reason: &ResetReason);
}

/// Terminates the process so the service supervisor restarts it.
pub struct ProcessReset;

impl SystemReset for ProcessReset {
    fn reset(&self, reason: &ResetReason) {
        error!("💥 Resetting node: {}", reason);
        log::logger().flush();
        std::process::exit(RESET_EXIT_CODE);
    }
}

pub trait HardwareWatchdog: Send {
    fn keepalive(&mut self) -> io::Result<()>;
}

/// Linux `/dev/watchdog`. The device is never magic-closed, so the board
/// reboots if this process dies.
pub struct LinuxWatchdog {
    device: File,
}

impl LinuxWatchdog {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let device = OpenOptions::new().write(true).open(path.as_ref())?;
        info!("🐕 Hardware watchdog armed: {}", path.as_ref().display());
        Ok(Self { device })
    }
}

impl HardwareWatchdog for LinuxWatchdog {
    fn keepalive(&mut self) -> io::Result<()> {
        self.device.write_all(b"k")?;
        self.device.flush()
    }
}

pub struct NoHardwareWatchdog;

impl HardwareWatchdog for NoHardwareWatchdog {
    fn keepalive(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Armed,
    Reset,
}

pub struct WatchdogCoordinator {
    timeout: Duration,
    resolution: Duration,
    remaining_ms: AtomicI64,
    expired: AtomicBool,
    hardware: Mutex<Box<dyn HardwareWatchdog>>,
    reset: Arc<dyn SystemReset>,
}

impl WatchdogCoordinator {
    pub const DEFAULT_RESOLUTION: Duration = Duration::from_secs(1);

    pub fn new(
        timeout: Duration,
        resolution: Duration,
        hardware: Box<dyn HardwareWatchdog>,
        reset: Arc<dyn SystemReset>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            timeout,
            resolution,
            remaining_ms: AtomicI64::new(0),
            expired: AtomicBool::new(false),
            hardware: Mutex::new(hardware),
            reset,
        });
        coordinator.feed();
        coordinator
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn feed(&self) {
        self.remaining_ms.store(duration_ms(self.timeout), Ordering::SeqCst);
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms.load(Ordering::SeqCst).max(0) as u64)
    }

    pub fn state(&self) -> WatchdogState {
        if self.expired.load(Ordering::SeqCst) {
            WatchdogState::Reset
        } else {
            WatchdogState::Armed
        }
    }

    /// Advances the budget by one resolution step.
    pub fn tick(&self) -> WatchdogState {
        if self.expired.load(Ordering::SeqCst) {
            return WatchdogState::Reset;
        }

        let step = duration_ms(self.resolution);
        let remaining = self.remaining_ms.fetch_sub(step, Ordering::SeqCst) - step;
        if remaining <= 0 {
            if !self.expired.swap(true, Ordering::SeqCst) {
                error!("⏰ Watchdog timeout elapsed after {:?}", self.timeout);
                self.reset.reset(&ResetReason::WatchdogExpired { timeout: self.timeout });
            }
            return WatchdogState::Reset;
        }

        match self.hardware.lock() {
            Ok(mut hardware) => {
                if let Err(e) = hardware.keepalive() {
                    warn!("⚠️  Hardware watchdog keepalive failed: {}", e);
                }
            }
            Err(_) => warn!("⚠️  Hardware watchdog lock poisoned"),
        }
        WatchdogState::Armed
    }

    /// Runs the tick timer on its own OS thread so a blocked scheduler
    /// cannot starve it.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let coordinator = Arc::clone(self);
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || loop {
                thread::sleep(coordinator.resolution);
                if coordinator.tick() == WatchdogState::Reset {
                    break;
                }
            })
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
