//! Plugin runtime: registration, lifecycle endpoints and heartbeat task

use crate::{PluginError, PluginHooks, Result};
use messaging::{BrokerConnection, Envelope};
use parking_lot::RwLock;
use platform_config::PluginSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::topics::{self, heartbeat_topic, lifecycle_topic};
use types::{
    DeregisterRequest, FleetStatus, Heartbeat, LifecycleOp, PluginState, RegisterReply,
    RegisterRequest, ReplyStatus, StatusReply,
};

/// Static description and behaviour switches of one plugin
#[derive(Debug, Clone)]
pub struct PluginOptions {
    pub name: String,
    pub version: String,
    pub description: String,
    pub auto_register: bool,
    /// Heartbeats per second; 0 disables the heartbeat task
    pub heartbeat_rate: f64,
    pub registration_timeout: Duration,
}

impl PluginOptions {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::from_settings(name, version, description, &PluginSettings::default())
    }

    pub fn from_settings(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        settings: &PluginSettings,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            auto_register: settings.auto_register,
            heartbeat_rate: settings.heartbeat_rate,
            registration_timeout: settings.registration_timeout(),
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_rate > 0.0).then(|| Duration::from_secs_f64(1.0 / self.heartbeat_rate))
    }
}

/// Cached copy of what the registry assigned to this plugin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub uuid: Option<String>,
    pub state: Option<PluginState>,
}

/// Handle given to hooks; shared between the dispatch tasks and the heartbeat
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    options: PluginOptions,
    connection: BrokerConnection,
    identity: RwLock<Identity>,
    shutdown: watch::Sender<bool>,
}

impl PluginContext {
    fn new(connection: BrokerConnection, options: PluginOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                options,
                connection,
                identity: RwLock::new(Identity::default()),
                shutdown,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &PluginOptions {
        &self.inner.options
    }

    pub fn connection(&self) -> &BrokerConnection {
        &self.inner.connection
    }

    pub fn identity(&self) -> Identity {
        self.inner.identity.read().clone()
    }

    pub fn uuid(&self) -> Option<String> {
        self.inner.identity.read().uuid.clone()
    }

    pub fn state(&self) -> Option<PluginState> {
        self.inner.identity.read().state
    }

    pub fn set_state(&self, state: PluginState) {
        self.inner.identity.write().state = Some(state);
    }

    /// Ask the owning process to stop
    pub fn request_shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub async fn wait_for_shutdown(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    /// Send `{uuid}` to the registry; an OK reply clears the cached uuid
    pub async fn deregister(&self) -> Result<()> {
        let uuid = self
            .uuid()
            .ok_or_else(|| PluginError::NotRegistered(self.name().to_string()))?;

        info!(plugin = %self.name(), plugin_uuid = %uuid, "Deregistering");
        let reply: StatusReply = self
            .connection()
            .call(
                topics::PLUGIN_DEREGISTER,
                DeregisterRequest { uuid },
                self.options().registration_timeout,
            )
            .await?
            .payload_as()?;

        if reply.status == ReplyStatus::Ok {
            *self.inner.identity.write() = Identity::default();
            Ok(())
        } else {
            Err(PluginError::Protocol("deregistration not acknowledged".into()))
        }
    }

    /// Snapshot of `{uuid, state}`; `None` until registered
    fn heartbeat(&self) -> Option<Heartbeat> {
        let identity = self.inner.identity.read();
        match (&identity.uuid, identity.state) {
            (Some(uuid), Some(state)) => Some(Heartbeat {
                uuid: uuid.clone(),
                state,
            }),
            _ => None,
        }
    }
}

pub struct PluginRuntime {
    context: PluginContext,
    hooks: Arc<dyn PluginHooks>,
    heartbeat: Option<JoinHandle<()>>,
}

impl PluginRuntime {
    /// Subscribe, register (if enabled) and start heartbeating
    pub async fn start(
        connection: BrokerConnection,
        options: PluginOptions,
        hooks: Arc<dyn PluginHooks>,
    ) -> Result<Self> {
        let context = PluginContext::new(connection, options);
        info!(
            plugin = %context.name(),
            version = %context.options().version,
            "Starting plugin"
        );

        let mut runtime = Self {
            context,
            hooks,
            heartbeat: None,
        };

        runtime.subscribe_status_updates().await?;
        runtime.hooks.declare_subscriptions(&runtime.context).await?;

        if runtime.context.options().auto_register {
            runtime.register().await?;
        }

        if let Some(interval) = runtime.context.options().heartbeat_interval() {
            runtime.heartbeat = Some(spawn_heartbeat(runtime.context.clone(), interval));
        }

        Ok(runtime)
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Block until a lifecycle stop (or `request_shutdown`) and clean up
    pub async fn run_until_stopped(self) {
        self.context.wait_for_shutdown().await;
        self.shutdown().await;
    }

    /// Stop heartbeating, deregister if still registered, close the connection
    pub async fn shutdown(mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if self.context.uuid().is_some() {
            if let Err(e) = self.context.deregister().await {
                warn!(plugin = %self.context.name(), "Deregistration failed: {}", e);
            }
        }
        self.context.connection().close().await;
        info!(plugin = %self.context.name(), "Plugin stopped");
    }

    async fn subscribe_status_updates(&self) -> Result<()> {
        let context = self.context.clone();
        let hooks = self.hooks.clone();

        self.context
            .connection()
            .register_notification_endpoint(topics::PLUGIN_STATUS, move |message: Envelope| {
                let context = context.clone();
                let hooks = hooks.clone();
                async move {
                    match message.payload_as::<FleetStatus>() {
                        Ok(status) => hooks.on_plugin_status_update(&context, status).await,
                        Err(e) => debug!("Ignoring malformed status update: {}", e),
                    }
                }
            })
            .await?;
        Ok(())
    }

    async fn register(&self) -> Result<()> {
        let options = self.context.options();
        let request = RegisterRequest {
            name: options.name.clone(),
            version: options.version.clone(),
            description: options.description.clone(),
        };

        let reply = loop {
            match self
                .context
                .connection()
                .call(topics::PLUGIN_REGISTER, &request, options.registration_timeout)
                .await
            {
                Ok(reply) => break reply,
                Err(e) if e.is_timeout() => {
                    warn!(
                        plugin = %options.name,
                        "No answer from plugin manager, retrying registration"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };

        let reply: RegisterReply = reply.payload_as()?;
        if reply.status != ReplyStatus::Ok {
            let reason = reply.error.unwrap_or_else(|| "no reason given".to_string());
            error!(plugin = %options.name, "Registration rejected: {}", reason);
            return Err(PluginError::RegistrationRejected {
                name: options.name.clone(),
                reason,
            });
        }

        let uuid = reply
            .uuid
            .ok_or_else(|| PluginError::Protocol("registration reply without uuid".into()))?;

        *self.context.inner.identity.write() = Identity {
            uuid: Some(uuid.clone()),
            state: Some(PluginState::Ready),
        };
        info!(plugin = %options.name, plugin_uuid = %uuid, "Registered");

        for op in LifecycleOp::ALL {
            self.register_lifecycle_endpoint(&uuid, op).await?;
        }

        self.hooks.on_registration_ok(&self.context).await
    }

    async fn register_lifecycle_endpoint(&self, uuid: &str, op: LifecycleOp) -> Result<()> {
        let context = self.context.clone();
        let hooks = self.hooks.clone();

        self.context
            .connection()
            .register_notification_endpoint(&lifecycle_topic(uuid, op), move |_message: Envelope| {
                let context = context.clone();
                let hooks = hooks.clone();
                async move { apply_lifecycle(&context, hooks.as_ref(), op).await }
            })
            .await?;
        Ok(())
    }
}

async fn apply_lifecycle(context: &PluginContext, hooks: &dyn PluginHooks, op: LifecycleOp) {
    info!(plugin = %context.name(), "Lifecycle {} received", op.as_str());

    match op {
        LifecycleOp::Start => {
            context.set_state(PluginState::Running);
            hooks.on_lifecycle_start(context).await;
        }
        LifecycleOp::Pause => {
            context.set_state(PluginState::Paused);
            hooks.on_lifecycle_pause(context).await;
        }
        LifecycleOp::Stop => {
            hooks.on_lifecycle_stop(context).await;
            if let Err(e) = context.deregister().await {
                warn!(plugin = %context.name(), "Deregistration on stop failed: {}", e);
            }
            context.request_shutdown();
        }
    }
}

fn spawn_heartbeat(context: PluginContext, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let heartbeat = match context.heartbeat() {
                Some(heartbeat) => heartbeat,
                None => continue,
            };
            let topic = heartbeat_topic(&heartbeat.uuid);
            if let Err(e) = context.connection().notify(&topic, &heartbeat, None).await {
                warn!(plugin = %context.name(), "Heartbeat failed: {}", e);
            }
        }
    })
}
