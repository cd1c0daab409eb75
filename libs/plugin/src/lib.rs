//! # Plugin Runtime
//!
//! ## Purpose
//!
//! Base behaviour of every worker process in the control plane. A plugin
//! hands its [`BrokerConnection`](messaging::BrokerConnection), its
//! [`PluginOptions`] and a [`PluginHooks`] implementation to
//! [`PluginRuntime::start`], which then:
//!
//! 1. listens for fleet-status broadcasts
//! 2. lets the hooks declare their own subscriptions
//! 3. registers with the plugin manager and caches the assigned uuid
//! 4. listens on `platform.management.plugin.<uuid>.lifecycle.{start,pause,stop}`
//! 5. heartbeats `{uuid, state}` at the configured rate
//!
//! ```text
//!  plugin                          plugin manager
//!    | -- register {name,...} ------------> |
//!    | <------------- {status: OK, uuid} -- |   state = READY
//!    | -- <uuid>.heartbeat {READY} -------> |
//!    | <------------ <uuid>.lifecycle.start |   state = RUNNING
//! ```

pub mod error;
pub mod hooks;
pub mod runtime;

pub use error::{PluginError, Result};
pub use hooks::PluginHooks;
pub use runtime::{Identity, PluginContext, PluginOptions, PluginRuntime};
