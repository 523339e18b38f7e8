//! # omm_types
//!
//! Shared data model for the multi-channel consumer session: identifiers, domains,
//! QoS, OMM stream states, the opaque message model and the transport seam.

pub mod channel;
pub mod domain;
pub mod errors;
pub mod ids;
pub mod msg;
pub mod qos;
pub mod service;
pub mod state;
pub mod transport;

pub use channel::ChannelConfig;
pub use channel::ConnectionType;
pub use domain::DomainType;
pub use errors::TransportError;
pub use ids::ChannelId;
pub use ids::Handle;
pub use ids::StreamId;
pub use msg::AckMsg;
pub use msg::CloseMsg;
pub use msg::DirectoryMsg;
pub use msg::GenericMsg;
pub use msg::Msg;
pub use msg::MsgKey;
pub use msg::NackCode;
pub use msg::PostMsg;
pub use msg::RefreshMsg;
pub use msg::RequestMsg;
pub use msg::StandbyRole;
pub use msg::StandbySignal;
pub use msg::StatusMsg;
pub use msg::UpdateMsg;
pub use qos::Qos;
pub use qos::Rate;
pub use qos::Timeliness;
pub use service::GroupStatus;
pub use service::MapAction;
pub use service::ServiceEntry;
pub use service::ServiceInfo;
pub use service::ServiceState;
pub use service::ServiceStatus;
pub use service::ServiceUpdate;
pub use state::DataState;
pub use state::OmmState;
pub use state::StatusCode;
pub use state::StreamState;
pub use transport::ChannelEvent;
pub use transport::Transport;
pub use transport::TransportEvent;
pub use transport::TransportEventSender;

/// Well-known stream ids used on every channel for the administrative domains
pub mod streams {
    use crate::ids::StreamId;

    /// Login stream, opened first on every channel
    pub const LOGIN: StreamId = 1;

    /// Source directory stream
    pub const DIRECTORY: StreamId = 2;

    /// Field dictionary stream
    pub const FIELD_DICTIONARY: StreamId = 3;

    /// Enumerated type dictionary stream
    pub const ENUM_DICTIONARY: StreamId = 4;

    /// First stream id handed out to item requests
    pub const FIRST_ITEM: StreamId = 5;
}
