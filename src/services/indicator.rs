use log::warn;
use std::path::{Path, PathBuf};

/// Visible liveness signal toggled while the loop idles.
pub trait StatusIndicator: Send {
    fn set(&mut self, on: bool);
    fn is_on(&self) -> bool;

    fn toggle(&mut self) {
        let next = !self.is_on();
        self.set(next);
    }
}

/// LED under `/sys/class/leds/<name>`.
pub struct SysfsLed {
    brightness: PathBuf,
    on: bool,
}

impl SysfsLed {
    pub fn new<P: AsRef<Path>>(led_dir: P) -> Self {
        Self {
            brightness: led_dir.as_ref().join("brightness"),
            on: false,
        }
    }
}

impl StatusIndicator for SysfsLed {
    fn set(&mut self, on: bool) {
        let value = if on { "1" } else { "0" };
        match std::fs::write(&self.brightness, value) {
            Ok(()) => self.on = on,
            Err(e) => warn!("⚠️  Failed to drive LED {}: {}", self.brightness.display(), e),
        }
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[derive(Default)]
pub struct NoIndicator {
    on: bool,
}

impl StatusIndicator for NoIndicator {
    fn set(&mut self, on: bool) {
        self.on = on;
    }

    fn is_on(&self) -> bool {
        self.on
    }
}
