//! Service instances and the replies of infrastructure collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Site chosen for one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VimAssignment {
    pub vim: String,
}

/// Function id -> chosen site
pub type PlacementMapping = BTreeMap<String, VimAssignment>;

/// Placement RPC reply: `{mapping}` or `{mapping: null}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementReply {
    pub mapping: Option<PlacementMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

/// `{request_status, message?, <domain record>}` as answered by infrastructure
/// adapters and lifecycle managers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureReply {
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub record: Map<String, Value>,
}

impl InfrastructureReply {
    pub fn completed() -> Self {
        Self {
            request_status: RequestStatus::Completed,
            message: None,
            record: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            request_status: RequestStatus::Error,
            message: Some(message.into()),
            record: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.record.insert(key.into(), value);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.request_status == RequestStatus::Completed
    }

    pub fn error_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "no error message given".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Instantiating,
    Completed,
    Failed,
    Terminating,
    Terminated,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Instantiating => "INSTANTIATING",
            ServiceStatus::Completed => "COMPLETED",
            ServiceStatus::Failed => "FAILED",
            ServiceStatus::Terminating => "TERMINATING",
            ServiceStatus::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// One deployable unit of a service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInstance {
    /// Descriptor id, the key used by placement
    pub id: String,
    pub instance_id: String,
    pub descriptor: Value,
    pub flavor: String,
    /// Unset until placement completes
    pub vim: Option<String>,
}

/// Persisted document of a service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub descriptor: Value,
    pub functions: Vec<FunctionInstance>,
    pub placement: Option<PlacementMapping>,
    pub status: ServiceStatus,
    pub created_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, descriptor: Value, functions: Vec<FunctionInstance>) -> Self {
        Self {
            id: id.into(),
            descriptor,
            functions,
            placement: None,
            status: ServiceStatus::Instantiating,
            created_at: Utc::now(),
        }
    }

    /// Descriptor id of the service, if the descriptor carries one
    pub fn descriptor_id(&self) -> Option<&str> {
        self.descriptor.get("id").and_then(Value::as_str)
    }

    /// Distinct sites in function order
    pub fn vims(&self) -> Vec<String> {
        let mut vims: Vec<String> = Vec::new();
        for vim in self.functions.iter().filter_map(|f| f.vim.as_ref()) {
            if !vims.contains(vim) {
                vims.push(vim.clone());
            }
        }
        vims
    }
}
