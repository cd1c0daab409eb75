//! # Control Plane Types
//!
//! Data model shared by every plugin process: the plugin fleet records kept by
//! the registry, the service instances driven by the lifecycle workflows, the
//! payloads exchanged over the broker, and the topic names that make up the
//! compatibility surface.
//!
//! ## Modules
//!
//! - [`topics`]: well-known topic names and per-plugin topic builders
//! - [`plugin`]: plugin records, lifecycle states, registration/heartbeat payloads
//! - [`service`]: service/function instances, placement mappings, infrastructure replies
//! - [`store`]: abstract document store with an in-memory implementation

pub mod plugin;
pub mod service;
pub mod store;
pub mod topics;

pub use plugin::{
    DeregisterRequest, FleetStatus, Heartbeat, LifecycleOp, PluginRecord, PluginState,
    RegisterReply, RegisterRequest, ReplyStatus, StatusReply,
};
pub use service::{
    FunctionInstance, InfrastructureReply, PlacementMapping, PlacementReply, RequestStatus,
    ServiceInstance, ServiceStatus, VimAssignment,
};
pub use store::{DocumentStore, InMemoryStore};
