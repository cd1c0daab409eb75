//! Topic names
//!
//! Plugin management topics are fixed. Orchestration topics here are the
//! defaults; deployments may override them through configuration.

use crate::plugin::LifecycleOp;

/// Root of every plugin management topic
pub const PLUGIN_ROOT: &str = "platform.management.plugin";

pub const PLUGIN_REGISTER: &str = "platform.management.plugin.register";
pub const PLUGIN_DEREGISTER: &str = "platform.management.plugin.deregister";
pub const PLUGIN_STATUS: &str = "platform.management.plugin.status";

/// Wildcard the registry subscribes to for heartbeats of every plugin
pub const PLUGIN_HEARTBEAT_PATTERN: &str = "platform.management.plugin.*.heartbeat";

// Orchestration defaults
pub const SERVICE_CREATE: &str = "service.instances.create";
pub const SERVICE_TERMINATE: &str = "service.instance.terminate";
pub const IA_TOPOLOGY: &str = "infrastructure.management.compute.list";
pub const IA_PREPARE: &str = "infrastructure.service.prepare";
pub const IA_REMOVE: &str = "infrastructure.service.remove";
pub const IA_CLOUD_SERVICE_DEPLOY: &str = "infrastructure.cloud_service.deploy";
pub const MANO_PLACE: &str = "mano.service.place";
pub const MANO_FUNCTION_DEPLOY: &str = "mano.function.deploy";
pub const MANO_CLOUD_SERVICE_DEPLOY: &str = "mano.cloud_service.deploy";

/// `platform.management.plugin.<uuid>.heartbeat`
pub fn heartbeat_topic(uuid: &str) -> String {
    format!("{}.{}.heartbeat", PLUGIN_ROOT, uuid)
}

/// `platform.management.plugin.<uuid>.lifecycle.<op>`
pub fn lifecycle_topic(uuid: &str, op: LifecycleOp) -> String {
    format!("{}.{}.lifecycle.{}", PLUGIN_ROOT, uuid, op.as_str())
}
