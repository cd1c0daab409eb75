//! Descriptor fixtures and mock collaborators

pub mod mock_infrastructure;

pub use mock_infrastructure::{InfrastructureBehaviour, MockInfrastructure};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

const NSD_DEMO: &str = include_str!("../data/nsd_demo.yml");
const VNFD_FIREWALL: &str = include_str!("../data/vnfd_firewall.yml");
const VNFD_CACHE: &str = include_str!("../data/vnfd_cache.yml");
const CSD_WEB: &str = include_str!("../data/csd_web.yml");
const TOPOLOGY: &str = include_str!("../data/topology.yml");

/// Parse a YAML fixture into any serde type
pub fn load<T: DeserializeOwned>(name: &str, yaml: &str) -> Result<T> {
    serde_yaml::from_str(yaml).with_context(|| format!("Invalid fixture '{}'", name))
}

/// Two-site topology: one OpenStack site, one Kubernetes site
pub fn topology() -> Result<Value> {
    load("topology", TOPOLOGY)
}

/// Service descriptor with its function descriptors
#[derive(Debug, Clone)]
pub struct ServiceFixture {
    pub nsd: Value,
    pub vnfds: Vec<Value>,
}

impl ServiceFixture {
    /// `firewall` then `cache`, both virtualised
    pub fn two_functions() -> Result<Self> {
        Ok(Self {
            nsd: load("nsd_demo", NSD_DEMO)?,
            vnfds: vec![
                load("vnfd_firewall", VNFD_FIREWALL)?,
                load("vnfd_cache", VNFD_CACHE)?,
            ],
        })
    }

    /// `firewall` plus the `web` container workload
    pub fn with_cloud_service() -> Result<Self> {
        Ok(Self {
            nsd: load("nsd_demo", NSD_DEMO)?,
            vnfds: vec![
                load("vnfd_firewall", VNFD_FIREWALL)?,
                load("csd_web", CSD_WEB)?,
            ],
        })
    }

    pub fn deploy_request(&self) -> Value {
        json!({ "nsd": self.nsd, "vnfds": self.vnfds })
    }
}
