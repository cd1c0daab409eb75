use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    /// Descriptor lacks an id or the resource requirements of its first VDU
    #[error("Invalid descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("Invalid placement request: {0}")]
    InvalidRequest(String),
}

impl PlacementError {
    pub fn invalid_descriptor(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlacementError>;
