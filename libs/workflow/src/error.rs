//! Engine-level errors
//!
//! Step failures are not represented here: they are the workflow's own
//! error type and come back inside [`PipelineOutcome::Failed`](crate::PipelineOutcome).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Instance '{0}' already has an active pipeline")]
    DuplicateInstance(String),

    #[error("No active pipeline for instance '{0}'")]
    UnknownInstance(String),

    /// The worker task panicked or was aborted before producing an outcome
    #[error("Pipeline worker for '{instance_id}' ended abnormally: {reason}")]
    WorkerLost { instance_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
