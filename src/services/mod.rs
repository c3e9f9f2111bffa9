pub mod acquisition;
pub mod indicator;
pub mod snapshot;
pub mod watchdog;

pub use acquisition::{
    AcquisitionLoop, Channel, CycleReport, CycleStep, FailureCounters, LoopSettings, SendOutcome, WatchdogFeed,
};
pub use indicator::{NoIndicator, StatusIndicator, SysfsLed};
pub use snapshot::{ChannelSnapshot, LastReadings, SnapshotPublisher, SnapshotReader};
pub use watchdog::{
    HardwareWatchdog, LinuxWatchdog, NoHardwareWatchdog, ProcessReset, ResetReason, SystemReset, WatchdogCoordinator,
    WatchdogState,
};
