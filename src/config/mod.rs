pub mod settings;

pub use settings::{
    Config,
    ConfigEntry,
    ConfigKey,
    ConfigStore,
    ConfigValue,
    NodeConfig,
    ParityConfig,
    DEFAULT_CONFIG_PATH,
};
