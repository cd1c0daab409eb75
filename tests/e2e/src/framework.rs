//! In-process control plane: one loopback broker, any set of plugins

use anyhow::{Context, Result};
use lifecycle::{CloudServiceLifecycleManager, ServiceLifecycleManager, CLM_NAME, SLM_NAME};
use messaging::{BrokerConnection, Envelope, LoopbackBroker};
use placement::{PlacementPlugin, PLACEMENT_PLUGIN_NAME};
use platform_config::PlatformConfig;
use plugin_manager::{PluginManager, PluginRegistry, PLUGIN_MANAGER_NAME};
use plugin_runtime::{PluginHooks, PluginOptions, PluginRuntime};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use types::{InMemoryStore, ServiceInstance};

/// Whether a subscriber was installed by this process
static LOGGING: OnceLock<bool> = OnceLock::new();

/// Route test logs through the test harness; `RUST_LOG` picks the level
pub fn init_test_logging() -> bool {
    *LOGGING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init()
            .is_ok()
    })
}

/// Wait up to `timeout` for the next value on `rx`
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

pub struct TestPlatform {
    broker: LoopbackBroker,
    config: PlatformConfig,
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPlatform {
    /// Plugins register on start but do not heartbeat unless a test asks
    pub fn new() -> Self {
        init_test_logging();

        let mut config = PlatformConfig::default();
        config.broker.call_timeout_ms = 5_000;
        config.plugin.heartbeat_rate = 0.0;
        config.plugin.registration_timeout_ms = 2_000;

        Self {
            broker: LoopbackBroker::new(),
            config,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn broker(&self) -> &LoopbackBroker {
        &self.broker
    }

    pub async fn connect(&self, app_id: &str) -> Result<BrokerConnection> {
        BrokerConnection::new(
            Arc::new(self.broker.clone()),
            app_id,
            self.config.broker.call_timeout(),
        )
        .await
        .with_context(|| format!("Failed to connect '{}'", app_id))
    }

    /// Subscribe `pattern` on a fresh observer connection
    pub async fn observe(&self, pattern: &str) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        let observer = self.connect("test.observer").await?;
        let (tx, rx) = mpsc::unbounded_channel();
        observer
            .subscribe(pattern, move |message: Envelope| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message);
                }
            })
            .await?;
        Ok(rx)
    }

    pub async fn start_plugin_manager(&self) -> Result<(PluginRuntime, Arc<PluginRegistry>)> {
        let connection = self.connect(PLUGIN_MANAGER_NAME).await?;
        let started = PluginManager::start(connection, &self.config).await?;
        info!("Plugin manager started");
        Ok(started)
    }

    async fn start_plugin(
        &self,
        name: &str,
        connection: BrokerConnection,
        hooks: Arc<dyn PluginHooks>,
        auto_register: bool,
    ) -> Result<PluginRuntime> {
        let options = PluginOptions {
            auto_register,
            ..PluginOptions::from_settings(name, "0.1.0", "e2e plugin", &self.config.plugin)
        };
        PluginRuntime::start(connection, options, hooks)
            .await
            .with_context(|| format!("Failed to start '{}'", name))
    }

    pub async fn start_placement(&self, auto_register: bool) -> Result<PluginRuntime> {
        let connection = self.connect(PLACEMENT_PLUGIN_NAME).await?;
        let hooks = Arc::new(PlacementPlugin::new(self.config.topics.placement.clone()));
        self.start_plugin(PLACEMENT_PLUGIN_NAME, connection, hooks, auto_register)
            .await
    }

    pub async fn start_slm(&self) -> Result<(PluginRuntime, ServiceLifecycleManager)> {
        let connection = self.connect(SLM_NAME).await?;
        let slm = ServiceLifecycleManager::new(
            connection.clone(),
            self.config.topics.clone(),
            Arc::new(InMemoryStore::<ServiceInstance>::new()),
            Arc::new(InMemoryStore::<serde_json::Value>::new()),
        );
        let runtime = self
            .start_plugin(SLM_NAME, connection, Arc::new(slm.clone()), false)
            .await?;
        Ok((runtime, slm))
    }

    pub async fn start_clm(&self) -> Result<PluginRuntime> {
        let connection = self.connect(CLM_NAME).await?;
        let clm = CloudServiceLifecycleManager::new(
            connection.clone(),
            &self.config.topics,
            Arc::new(InMemoryStore::<serde_json::Value>::new()),
            self.config.lifecycle.worker_pool_size,
        );
        self.start_plugin(CLM_NAME, connection, Arc::new(clm), false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_is_installed_once() {
        let first = init_test_logging();
        assert_eq!(init_test_logging(), first);
        assert_eq!(LOGGING.get(), Some(&first));
    }
}
