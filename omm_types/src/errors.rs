use thiserror::Error;

use crate::ids::ChannelId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect {channel} to {address}: {reason}")]
    ConnectFailed { channel: ChannelId, address: String, reason: String },

    #[error("Failed to send on {channel}: {reason}")]
    SendFailed { channel: ChannelId, reason: String },

    #[error("{0} is not connected")]
    NotConnected(ChannelId),

    #[error("Transport has no event sink attached")]
    Detached,
}

pub type Result<T> = std::result::Result<T, TransportError>;
