//! # Lifecycle Managers
//!
//! ## Purpose
//!
//! The two orchestration plugins built on the [`workflow`] engine:
//!
//! - [`ServiceLifecycleManager`] instantiates network services: topology,
//!   placement, infrastructure preparation, per-function deployment and
//!   records, with a whole-instance rollback when deployment fails
//! - [`CloudServiceLifecycleManager`] deploys container workloads routed to
//!   it by the SLM's `kubernetes` flavor
//!
//! ## Architecture Role
//!
//! ```mermaid
//! graph LR
//!     Caller -->|service.instances.create| SLM
//!     SLM -->|mano.service.place| Placement
//!     SLM -->|mano.function.deploy| FLM[Function adapter]
//!     SLM -->|mano.cloud_service.deploy| CLM
//!     CLM -->|infrastructure.cloud_service.deploy| IA[Infrastructure adapter]
//!     SLM -->|infrastructure.service.*| IA
//! ```

pub mod cloud_service;
pub mod error;
pub mod network_service;
pub mod records;

pub use cloud_service::{CloudServiceLifecycleManager, CloudServiceRequest, CLM_NAME};
pub use error::{LifecycleError, Result};
pub use network_service::{ServiceLifecycleManager, ServiceStep, SLM_NAME};
pub use records::{InstanceStore, RecordStore};
