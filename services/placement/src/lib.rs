//! # Placement
//!
//! Resource-aware first-fit placement of a service's network functions and
//! cloud services onto the sites of a topology snapshot, and the plugin that
//! serves it over the broker.

pub mod error;
pub mod resolver;
pub mod service;

pub use error::{PlacementError, Result};
pub use resolver::{
    resolve_placement, CloudServiceDemand, FunctionDemand, PlacementRequest, Site, SiteKind,
};
pub use service::{answer, PlacementPlugin, PLACEMENT_PLUGIN_NAME};
