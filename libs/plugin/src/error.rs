use messaging::MessagingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// The plugin manager refused the registration; the process cannot work
    #[error("Registration of '{name}' rejected: {reason}")]
    RegistrationRejected { name: String, reason: String },

    #[error("Plugin '{0}' is not registered")]
    NotRegistered(String),

    #[error("Unexpected reply from plugin manager: {0}")]
    Protocol(String),

    /// Failure raised by a plugin's own hook
    #[error("Plugin hook failed: {0}")]
    Hook(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
