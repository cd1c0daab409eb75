//! Overridable plugin callbacks
//!
//! The runtime applies the base state transition (READY after registration,
//! RUNNING on start, PAUSED on pause) before calling the matching hook, so
//! implementations only add their own behaviour.

use crate::{PluginContext, Result};
use async_trait::async_trait;
use types::FleetStatus;

#[async_trait]
pub trait PluginHooks: Send + Sync + 'static {
    /// Subscribe to the plugin's own topics; runs before registration
    async fn declare_subscriptions(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_registration_ok(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_lifecycle_start(&self, _ctx: &PluginContext) {}

    async fn on_lifecycle_pause(&self, _ctx: &PluginContext) {}

    /// Runs before the runtime deregisters and shuts the plugin down
    async fn on_lifecycle_stop(&self, _ctx: &PluginContext) {}

    async fn on_plugin_status_update(&self, _ctx: &PluginContext, _status: FleetStatus) {}
}
