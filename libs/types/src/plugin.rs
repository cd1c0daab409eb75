//! Plugin fleet records and the registration/heartbeat payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a plugin as tracked by the registry
///
/// ```text
/// REGISTERED -> READY -> RUNNING <-> PAUSED
///                  \________________/ -> deregistered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Registered,
    Ready,
    Running,
    Paused,
    Failed,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Registered => "REGISTERED",
            PluginState::Ready => "READY",
            PluginState::Running => "RUNNING",
            PluginState::Paused => "PAUSED",
            PluginState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle command the registry pushes to a single plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleOp {
    Start,
    Pause,
    Stop,
}

impl LifecycleOp {
    pub const ALL: [LifecycleOp; 3] = [LifecycleOp::Start, LifecycleOp::Pause, LifecycleOp::Stop];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOp::Start => "start",
            LifecycleOp::Pause => "pause",
            LifecycleOp::Stop => "stop",
        }
    }
}

/// Registry-owned record of one plugin process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub state: PluginState,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Set once the registry has pushed `lifecycle.start` for this record
    #[serde(default, skip_serializing)]
    pub start_sent: bool,
}

impl PluginRecord {
    pub fn new(uuid: impl Into<String>, request: &RegisterRequest) -> Self {
        Self {
            uuid: uuid.into(),
            name: request.name.clone(),
            version: request.version.clone(),
            description: request.description.clone(),
            state: PluginState::Registered,
            registered_at: Utc::now(),
            last_heartbeat_at: None,
            start_sent: false,
        }
    }

    /// Most recent sign of life: last heartbeat, or registration if none yet
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_heartbeat_at.unwrap_or(self.registered_at)
    }
}

/// Outcome flag carried by registry replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// `platform.management.plugin.register` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// `platform.management.plugin.register` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub status: ReplyStatus,
    pub uuid: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl RegisterReply {
    pub fn accepted(record: &PluginRecord) -> Self {
        Self {
            status: ReplyStatus::Ok,
            uuid: Some(record.uuid.clone()),
            name: record.name.clone(),
            version: record.version.clone(),
            description: record.description.clone(),
            error: None,
        }
    }
}

/// `platform.management.plugin.deregister` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub uuid: String,
}

/// Bare `{status}` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: ReplyStatus,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
        }
    }
}

/// `platform.management.plugin.<uuid>.heartbeat` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub uuid: String,
    pub state: PluginState,
}

/// Fleet snapshot broadcast on `platform.management.plugin.status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub timestamp: DateTime<Utc>,
    pub plugin_dict: BTreeMap<String, PluginRecord>,
}

impl FleetStatus {
    pub fn state_of(&self, uuid: &str) -> Option<PluginState> {
        self.plugin_dict.get(uuid).map(|record| record.state)
    }
}
