use omm_types::Handle;
use omm_types::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    #[error("Unknown or closed {0}")]
    UnknownHandle(Handle),

    #[error("No channel logged in: {0}")]
    NoChannelLoggedIn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session is shut down")]
    Shutdown,

    #[error("Failed to start dispatcher thread: {0}")]
    Thread(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
