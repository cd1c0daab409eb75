//! # Plugin Manager
//!
//! ## Purpose
//!
//! Tracks the plugin fleet. Plugins register here, heartbeat here, and are
//! started here: the first READY heartbeat of a plugin makes the manager send
//! it `lifecycle.start`.
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Plugin -->|register / deregister| Manager
//!     Plugin -->|"&lt;uuid&gt;.heartbeat"| Manager
//!     Manager -->|"&lt;uuid&gt;.lifecycle.start"| Plugin
//!     Manager -->|status broadcast| Fleet[All plugins]
//! ```

pub mod registry;
pub mod service;

pub use registry::{PluginRegistry, PluginStore};
pub use service::{PluginManager, PLUGIN_MANAGER_NAME};
