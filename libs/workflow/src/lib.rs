//! # Workflow Engine
//!
//! ## Purpose
//!
//! Drives multi-step distributed operations (instantiate a network service,
//! deploy a cloud service, tear an instance down) one instance at a time per
//! pipeline, with many instances in parallel.
//!
//! ## Contract
//!
//! - at most one step per instance is in flight
//! - a step may pause its pipeline until [`WorkflowEngine::resume`] delivers a
//!   value (an RPC reply arriving on another subscription)
//! - [`WorkflowEngine::kill`] is cooperative: checked between steps and while
//!   paused
//! - the first step error stops the queue and runs [`Workflow::on_failure`],
//!   whose result is the error the caller sees
//!
//! ```mermaid
//! graph LR
//!     Trigger -->|start| Worker
//!     Worker -->|run_step| Workflow
//!     Workflow -->|pause| Worker
//!     Reply -->|resume| Worker
//!     Worker -->|outcome| Handle
//! ```

pub mod engine;
pub mod error;

pub use engine::{PipelineHandle, PipelineOutcome, StepControl, Workflow, WorkflowEngine};
pub use error::{Result, WorkflowError};
