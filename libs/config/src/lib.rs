//! # Control Plane Configuration
//!
//! Every service binary loads one [`PlatformConfig`]: compiled defaults, then
//! an optional TOML file, then `MANO_`-prefixed environment variables
//! (`MANO_BROKER__URL=tcp://broker:5672`).
//!
//! ```rust,no_run
//! use platform_config::PlatformConfig;
//!
//! let config = PlatformConfig::load(None).unwrap();
//! assert_eq!(config.plugin.heartbeat_rate, 0.5);
//! ```

pub mod logging;
pub mod settings;

pub use logging::init_tracing;
pub use settings::{
    BrokerSettings, LifecycleSettings, LoggingSettings, PlatformConfig, PluginSettings,
    RegistrySettings, RelaySettings, TopicSettings,
};
