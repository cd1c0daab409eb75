//! End-to-end test framework for the control plane
//!
//! Every plugin runs in-process against one shared
//! [`LoopbackBroker`](messaging::LoopbackBroker), so scenarios exercise the
//! real registration, placement and lifecycle code paths over the same
//! envelope protocol the relay carries.

pub mod fixtures;
pub mod framework;

pub use fixtures::*;
pub use framework::{init_test_logging, recv_within, TestPlatform};
