//! # Relay Broker
//!
//! Standalone topic router for plugin processes that live in separate
//! address spaces. Clients speak the length-prefixed frame protocol from
//! [`messaging::frame`]; the relay keeps a per-connection subscription table
//! and forwards each published envelope to every matching subscription,
//! the publisher's own included.

pub mod server;

pub use server::{RelayServer, RelayStats};

use messaging::MessagingError;

/// Relay-specific errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;
