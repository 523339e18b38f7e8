use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::DomainType;
use crate::ids::StreamId;
use crate::qos::Qos;
use crate::service::ServiceEntry;
use crate::service::ServiceUpdate;
use crate::state::OmmState;

/// Item identity: name plus the service it is requested from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgKey {
    pub name: Option<String>,
    pub service_id: Option<u16>,
    pub service_name: Option<String>,
}

impl MsgKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Default::default() }
    }

    pub fn with_service_id(mut self, service_id: u16) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }
}

/// Item, login, directory or dictionary request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub qos: Option<Qos>,
    /// Priority class and count
    pub priority: Option<(u8, u16)>,
    pub streaming: bool,
    pub private_stream: bool,
    /// Item names of a batch request; `key.name` is unset when non-empty
    pub batch: Vec<String>,
    /// Service list name the request was made against, never sent on the wire
    pub service_list: Option<String>,
    pub payload: Bytes,
}

impl RequestMsg {
    pub fn new(domain: DomainType) -> Self {
        Self {
            stream_id: 0,
            domain,
            key: MsgKey::default(),
            qos: None,
            priority: None,
            streaming: true,
            private_stream: false,
            batch: Vec::new(),
            service_list: None,
            payload: Bytes::new(),
        }
    }

    /// Market price request for a single item
    pub fn market_price(name: impl Into<String>) -> Self {
        Self::new(DomainType::MarketPrice).name(name)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.key.name = Some(name.into());
        self
    }

    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.key.service_name = Some(service_name.into());
        self
    }

    pub fn service_id(mut self, service_id: u16) -> Self {
        self.key.service_id = Some(service_id);
        self
    }

    pub fn service_list(mut self, service_list: impl Into<String>) -> Self {
        self.service_list = Some(service_list.into());
        self
    }

    pub fn qos(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn priority(mut self, class: u8, count: u16) -> Self {
        self.priority = Some((class, count));
        self
    }

    pub fn private_stream(mut self, private_stream: bool) -> Self {
        self.private_stream = private_stream;
        self
    }

    pub fn interest_after_refresh(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn batch<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.batch = names.into_iter().map(Into::into).collect();
        self.key.name = None;
        self
    }

    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_batch(&self) -> bool {
        !self.batch.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub state: OmmState,
    pub qos: Option<Qos>,
    pub solicited: bool,
    pub complete: bool,
    pub clear_cache: bool,
    pub private_stream: bool,
    pub item_group: Option<Bytes>,
    pub payload: Bytes,
}

impl RefreshMsg {
    pub fn new(stream_id: StreamId, domain: DomainType, key: MsgKey, state: OmmState) -> Self {
        Self {
            stream_id,
            domain,
            key,
            state,
            qos: None,
            solicited: true,
            complete: true,
            clear_cache: true,
            private_stream: false,
            item_group: None,
            payload: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub state: Option<OmmState>,
    pub item_group: Option<Bytes>,
    pub private_stream: bool,
}

impl StatusMsg {
    pub fn new(stream_id: StreamId, domain: DomainType, key: MsgKey, state: OmmState) -> Self {
        Self { stream_id, domain, key, state: Some(state), item_group: None, private_stream: false }
    }
}

/// Active/standby role of a warm standby member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandbyRole {
    Active,
    Standby,
}

/// Warm standby element carried by a provider generic message
///
/// On the login stream it applies to the whole channel, on the directory stream to `service_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandbySignal {
    pub role: StandbyRole,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub standby: Option<StandbySignal>,
    pub payload: Bytes,
}

impl GenericMsg {
    pub fn new(domain: DomainType, name: impl Into<String>) -> Self {
        Self { stream_id: 0, domain, key: MsgKey::named(name), standby: None, payload: Bytes::new() }
    }

    /// Provider connection status signal for the login-based warm standby mode
    pub fn login_standby(role: StandbyRole) -> Self {
        let mut msg = Self::new(DomainType::Login, "ConsumerConnectionStatus");
        msg.stream_id = crate::streams::LOGIN;
        msg.standby = Some(StandbySignal { role, service_name: None });
        msg
    }

    /// Provider group status signal for the service-based warm standby mode
    pub fn service_standby(service_name: impl Into<String>, role: StandbyRole) -> Self {
        let mut msg = Self::new(DomainType::Source, "ConsumerStatus");
        msg.stream_id = crate::streams::DIRECTORY;
        msg.standby = Some(StandbySignal { role, service_name: Some(service_name.into()) });
        msg
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub post_id: u32,
    pub solicit_ack: bool,
    pub complete: bool,
    pub payload: Bytes,
}

impl PostMsg {
    pub fn new(post_id: u32) -> Self {
        Self {
            stream_id: 0,
            domain: DomainType::MarketPrice,
            key: MsgKey::default(),
            post_id,
            solicit_ack: false,
            complete: true,
            payload: Bytes::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.key.name = Some(name.into());
        self
    }

    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.key.service_name = Some(service_name.into());
        self
    }

    pub fn service_id(mut self, service_id: u16) -> Self {
        self.key.service_id = Some(service_id);
        self
    }

    pub fn solicit_ack(mut self, solicit_ack: bool) -> Self {
        self.solicit_ack = solicit_ack;
        self
    }

    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }
}

/// Reason a post was negatively acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NackCode {
    AccessDenied,
    DeniedBySource,
    SourceDown,
    SourceUnknown,
    NoResources,
    NoResponse,
    GatewayDown,
    InvalidContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AckMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    pub ack_id: u32,
    pub nack_code: Option<NackCode>,
    pub text: Option<String>,
}

impl AckMsg {
    pub fn ack(stream_id: StreamId, domain: DomainType, ack_id: u32) -> Self {
        Self { stream_id, domain, key: MsgKey::default(), ack_id, nack_code: None, text: None }
    }

    pub fn nack(stream_id: StreamId, domain: DomainType, ack_id: u32, code: NackCode, text: impl Into<String>) -> Self {
        Self { stream_id, domain, key: MsgKey::default(), ack_id, nack_code: Some(code), text: Some(text.into()) }
    }

    pub fn is_nack(&self) -> bool {
        self.nack_code.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
}

/// Decoded source directory message
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryMsg {
    /// Full service set of the channel; services not listed no longer exist
    Refresh { stream_id: StreamId, services: Vec<ServiceEntry> },
    /// Incremental per-service changes
    Update { stream_id: StreamId, updates: Vec<ServiceUpdate> },
    Status { stream_id: StreamId, state: OmmState },
}

impl DirectoryMsg {
    pub fn stream_id(&self) -> StreamId {
        match self {
            DirectoryMsg::Refresh { stream_id, .. } | DirectoryMsg::Update { stream_id, .. } | DirectoryMsg::Status { stream_id, .. } => *stream_id,
        }
    }
}

/// Opaque OMM message as exchanged with the transport
///
/// Payloads are never inspected by the session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Request(RequestMsg),
    Refresh(RefreshMsg),
    Update(UpdateMsg),
    Status(StatusMsg),
    Generic(GenericMsg),
    Post(PostMsg),
    Ack(AckMsg),
    Close(CloseMsg),
    Directory(DirectoryMsg),
}

impl Msg {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Msg::Request(msg) => msg.stream_id,
            Msg::Refresh(msg) => msg.stream_id,
            Msg::Update(msg) => msg.stream_id,
            Msg::Status(msg) => msg.stream_id,
            Msg::Generic(msg) => msg.stream_id,
            Msg::Post(msg) => msg.stream_id,
            Msg::Ack(msg) => msg.stream_id,
            Msg::Close(msg) => msg.stream_id,
            Msg::Directory(msg) => msg.stream_id(),
        }
    }

    pub fn domain(&self) -> DomainType {
        match self {
            Msg::Request(msg) => msg.domain,
            Msg::Refresh(msg) => msg.domain,
            Msg::Update(msg) => msg.domain,
            Msg::Status(msg) => msg.domain,
            Msg::Generic(msg) => msg.domain,
            Msg::Post(msg) => msg.domain,
            Msg::Ack(msg) => msg.domain,
            Msg::Close(msg) => msg.domain,
            Msg::Directory(_) => DomainType::Source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Request(_) => "ReqMsg",
            Msg::Refresh(_) => "RefreshMsg",
            Msg::Update(_) => "UpdateMsg",
            Msg::Status(_) => "StatusMsg",
            Msg::Generic(_) => "GenericMsg",
            Msg::Post(_) => "PostMsg",
            Msg::Ack(_) => "AckMsg",
            Msg::Close(_) => "CloseMsg",
            Msg::Directory(_) => "DirectoryMsg",
        }
    }
}
