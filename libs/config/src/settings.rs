//! Service Configuration Module
//!
//! Loads [`PlatformConfig`] from an optional TOML file with environment
//! variable overrides. Every section has compiled defaults so a bare
//! environment is a valid configuration.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use types::topics;

/// Environment variable prefix (`MANO_BROKER__URL`)
pub const ENV_PREFIX: &str = "MANO";

/// Main configuration structure shared by every service binary
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct PlatformConfig {
    pub broker: BrokerSettings,
    pub relay: RelaySettings,
    pub plugin: PluginSettings,
    pub registry: RegistrySettings,
    pub lifecycle: LifecycleSettings,
    pub topics: TopicSettings,
    pub logging: LoggingSettings,
}

/// Broker connection settings used by every plugin process
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BrokerSettings {
    /// `tcp://host:port` of the relay broker, or `loopback` for an in-process one
    pub url: String,
    pub connect_retry_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub max_frame_size: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:5672".to_string(),
            connect_retry_interval_ms: 5_000,
            call_timeout_ms: 20_000,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl BrokerSettings {
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Relay broker server settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RelaySettings {
    pub listen_address: String,
    pub max_frame_size: usize,
    pub outbound_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:5672".to_string(),
            max_frame_size: 16 * 1024 * 1024,
            outbound_buffer: 10_000,
        }
    }
}

/// Generic plugin behaviour
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PluginSettings {
    pub auto_register: bool,
    /// Heartbeats per second; 0 disables heartbeating
    pub heartbeat_rate: f64,
    pub registration_timeout_ms: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            auto_register: true,
            heartbeat_rate: 0.5,
            registration_timeout_ms: 5_000,
        }
    }
}

impl PluginSettings {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

/// Plugin manager settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RegistrySettings {
    /// Plugins silent for longer than this are dropped; 0 disables reaping
    pub liveness_timeout_ms: u64,
    pub reap_interval_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 0,
            reap_interval_ms: 5_000,
        }
    }
}

impl RegistrySettings {
    pub fn liveness_timeout(&self) -> Option<Duration> {
        (self.liveness_timeout_ms > 0).then(|| Duration::from_millis(self.liveness_timeout_ms))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

/// Workflow engine settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Concurrent steps across all cloud-service pipelines
    pub worker_pool_size: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
        }
    }
}

/// Orchestration topic names
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TopicSettings {
    pub service_create: String,
    pub service_terminate: String,
    pub topology: String,
    pub placement: String,
    pub prepare: String,
    pub remove: String,
    pub cloud_service_create: String,
    pub infrastructure_cloud_service_deploy: String,
    /// Descriptor flavor -> deployment topic
    pub flavor_routes: BTreeMap<String, String>,
}

impl Default for TopicSettings {
    fn default() -> Self {
        let mut flavor_routes = BTreeMap::new();
        flavor_routes.insert("openstack".to_string(), topics::MANO_FUNCTION_DEPLOY.to_string());
        flavor_routes.insert(
            "kubernetes".to_string(),
            topics::MANO_CLOUD_SERVICE_DEPLOY.to_string(),
        );

        Self {
            service_create: topics::SERVICE_CREATE.to_string(),
            service_terminate: topics::SERVICE_TERMINATE.to_string(),
            topology: topics::IA_TOPOLOGY.to_string(),
            placement: topics::MANO_PLACE.to_string(),
            prepare: topics::IA_PREPARE.to_string(),
            remove: topics::IA_REMOVE.to_string(),
            cloud_service_create: topics::MANO_CLOUD_SERVICE_DEPLOY.to_string(),
            infrastructure_cloud_service_deploy: topics::IA_CLOUD_SERVICE_DEPLOY.to_string(),
            flavor_routes,
        }
    }
}

impl TopicSettings {
    pub fn route_for_flavor(&self, flavor: &str) -> Option<&str> {
        self.flavor_routes.get(flavor).map(String::as_str)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PlatformConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading configuration: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (MANO_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let config: PlatformConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        debug!(broker = %config.broker.url, "Configuration loaded");
        Ok(config)
    }

    /// Render as TOML, e.g. to seed a configuration file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}
