//! Plugin manager process wiring
//!
//! The manager is itself a plugin: it runs on the plugin runtime, but never
//! registers with itself and never heartbeats. Its subscriptions hand every
//! management message to the [`PluginRegistry`].

use crate::registry::{PluginRegistry, PluginStore};
use async_trait::async_trait;
use messaging::{BrokerConnection, Envelope};
use parking_lot::Mutex;
use platform_config::{PlatformConfig, RegistrySettings};
use plugin_runtime::{PluginContext, PluginHooks, PluginOptions, PluginRuntime, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use types::topics;
use types::InMemoryStore;

pub const PLUGIN_MANAGER_NAME: &str = "platform.PluginManager";

pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    settings: RegistrySettings,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl PluginManager {
    pub fn new(registry: Arc<PluginRegistry>, settings: RegistrySettings) -> Self {
        Self {
            registry,
            settings,
            reaper: Mutex::new(None),
        }
    }

    /// Build the registry over an in-memory table and start the manager plugin
    pub async fn start(
        connection: BrokerConnection,
        config: &PlatformConfig,
    ) -> Result<(PluginRuntime, Arc<PluginRegistry>)> {
        let store: Arc<PluginStore> = Arc::new(InMemoryStore::new());
        let registry = Arc::new(PluginRegistry::new(
            PLUGIN_MANAGER_NAME,
            connection.clone(),
            store,
        ));

        let options = PluginOptions {
            auto_register: false,
            heartbeat_rate: 0.0,
            ..PluginOptions::from_settings(
                PLUGIN_MANAGER_NAME,
                env!("CARGO_PKG_VERSION"),
                "Plugin registry and lifecycle controller",
                &config.plugin,
            )
        };
        let hooks = Arc::new(Self::new(registry.clone(), config.registry.clone()));
        let runtime = PluginRuntime::start(connection, options, hooks).await?;

        Ok((runtime, registry))
    }

    fn spawn_reaper(&self, timeout: Duration) {
        let registry = self.registry.clone();
        let interval = self.settings.reap_interval();
        info!(
            timeout_ms = timeout.as_millis() as u64,
            "Liveness reaper enabled"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.reap_stale(timeout).await;
            }
        });
        if let Some(previous) = self.reaper.lock().replace(task) {
            previous.abort();
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
    }
}

#[async_trait]
impl PluginHooks for PluginManager {
    async fn declare_subscriptions(&self, ctx: &PluginContext) -> Result<()> {
        let connection = ctx.connection();

        let registry = self.registry.clone();
        connection
            .subscribe(topics::PLUGIN_REGISTER, move |request: Envelope| {
                let registry = registry.clone();
                async move { registry.on_register(request).await }
            })
            .await?;

        let registry = self.registry.clone();
        connection
            .subscribe(topics::PLUGIN_DEREGISTER, move |request: Envelope| {
                let registry = registry.clone();
                async move { registry.on_deregister(request).await }
            })
            .await?;

        let registry = self.registry.clone();
        connection
            .register_notification_endpoint(
                topics::PLUGIN_HEARTBEAT_PATTERN,
                move |message: Envelope| {
                    let registry = registry.clone();
                    async move { registry.on_heartbeat(message).await }
                },
            )
            .await?;

        if let Some(timeout) = self.settings.liveness_timeout() {
            self.spawn_reaper(timeout);
        }

        info!(plugin = %ctx.name(), "Plugin manager listening");
        Ok(())
    }

    async fn on_lifecycle_stop(&self, _ctx: &PluginContext) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
    }
}
