//! Lifecycle error taxonomy
//!
//! Every variant renders to the message the original requester receives, so
//! `Display` output is part of the reply format.

use messaging::MessagingError;
use thiserror::Error;
use workflow::WorkflowError;

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Malformed trigger request; answered before anything is created
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Descriptor asks for something this deployment cannot route
    #[error("{0}")]
    Configuration(String),

    #[error("Placement failed: {0}")]
    Placement(String),

    /// Deployment or record failure, with the outcome of the rollback attempt
    #[error("{}", compose(.message, .rollback))]
    Instantiation {
        message: String,
        rollback: Option<String>,
    },

    #[error("Termination failed: {0}")]
    Termination(String),

    #[error("Unknown service instance '{0}'")]
    UnknownInstance(String),

    #[error(transparent)]
    Transport(#[from] MessagingError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl LifecycleError {
    pub fn instantiation(message: impl Into<String>) -> Self {
        Self::Instantiation {
            message: message.into(),
            rollback: None,
        }
    }

    pub fn unsupported_flavor(flavor: &str) -> Self {
        Self::Configuration(format!(
            "The service lifecycle manager does not support descriptor flavor \"{}\"",
            flavor
        ))
    }

    /// Attach a failed rollback to this error, turning it into an instantiation error
    pub fn with_rollback_failure(self, rollback: &LifecycleError) -> Self {
        let message = match self {
            Self::Instantiation { message, .. } => message,
            other => other.to_string(),
        };
        Self::Instantiation {
            message,
            rollback: Some(rollback.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

fn compose(message: &str, rollback: &Option<String>) -> String {
    match rollback {
        Some(rollback) => format!("{}; rollback failed: {}", message, rollback),
        None => message.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
