use std::collections::BTreeSet;

use bytes::Bytes;
use omm_types::ChannelId;
use omm_types::DomainType;
use omm_types::Handle;
use omm_types::MsgKey;
use omm_types::Qos;
use omm_types::RequestMsg;
use omm_types::StreamId;

/// How a request names its service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceSelector {
    Name(String),
    Id(u16),
    List(String),
    Unspecified,
}

impl ServiceSelector {
    pub fn from_request(request: &RequestMsg) -> Self {
        if let Some(list) = &request.service_list {
            return ServiceSelector::List(list.clone());
        }
        if let Some(name) = &request.key.service_name {
            return ServiceSelector::Name(name.clone());
        }
        match request.key.service_id {
            Some(id) => ServiceSelector::Id(id),
            None => ServiceSelector::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unopened,
    AwaitingRefresh,
    Open,
    Recovering,
    Closed,
}

/// Where an item currently lives on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub channel: ChannelId,
    pub stream_id: StreamId,
    /// Logical id of the concrete service serving the item
    pub service_id: u16,
    pub service_name: String,
    pub provider_service_id: u16,
}

/// Routing state of one application item request
#[derive(Debug, Clone)]
pub struct ItemRequestState {
    pub handle: Handle,
    pub parent: Option<Handle>,
    /// Request as given by the application, single item
    pub request: RequestMsg,
    pub selector: ServiceSelector,
    pub current: Option<Binding>,
    /// Private stream waiting to be recovered on this channel
    pub home: Option<ChannelId>,
    /// Channels already attempted in the current fallback round
    pub tried: BTreeSet<ChannelId>,
    pub lifecycle: Lifecycle,
    /// Bumped whenever a pending request timeout must be ignored
    pub epoch: u64,
    pub item_group: Option<Bytes>,
    /// An Open/Suspect status is outstanding towards the application
    pub suspect_sent: bool,
    /// Service name and id shown to the application
    pub app_service_name: Option<String>,
    pub app_service_id: Option<u16>,
}

impl ItemRequestState {
    pub fn new(handle: Handle, parent: Option<Handle>, request: RequestMsg) -> Self {
        let selector = ServiceSelector::from_request(&request);
        let (app_service_name, app_service_id) = match &selector {
            ServiceSelector::Name(name) => (Some(name.clone()), None),
            ServiceSelector::Id(id) => (None, Some(*id)),
            ServiceSelector::List(list) => (Some(list.clone()), None),
            ServiceSelector::Unspecified => (None, None),
        };

        Self {
            handle,
            parent,
            request,
            selector,
            current: None,
            home: None,
            tried: BTreeSet::new(),
            lifecycle: Lifecycle::Unopened,
            epoch: 0,
            item_group: None,
            suspect_sent: false,
            app_service_name,
            app_service_id,
        }
    }

    pub fn domain(&self) -> DomainType {
        self.request.domain
    }

    pub fn is_private(&self) -> bool {
        self.request.private_stream
    }

    pub fn requested_qos(&self) -> Qos {
        self.request.qos.unwrap_or_default()
    }

    pub fn is_bound_to(&self, channel: ChannelId) -> bool {
        self.current.as_ref().is_some_and(|binding| binding.channel == channel)
    }

    /// Fills in whichever half of the application's service identity the selector left open
    pub fn learn_service(&mut self, service_id: u16, service_name: &str) {
        match self.selector {
            ServiceSelector::Name(_) => self.app_service_id = Some(service_id),
            ServiceSelector::Id(_) => self.app_service_name = Some(service_name.to_string()),
            ServiceSelector::List(_) | ServiceSelector::Unspecified => {}
        }
    }

    /// Key as presented to the application
    pub fn app_key(&self, received: &MsgKey) -> MsgKey {
        MsgKey {
            name: received.name.clone().or_else(|| self.request.key.name.clone()),
            service_id: self.app_service_id,
            service_name: self.app_service_name.clone(),
        }
    }

    /// Wire request for `binding`
    pub fn wire_request(&self, binding: &Binding) -> RequestMsg {
        let mut request = self.request.clone();
        request.stream_id = binding.stream_id;
        request.key.service_id = Some(binding.provider_service_id);
        request.key.service_name = None;
        request.service_list = None;
        request.batch.clear();
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_precedence() {
        let request = RequestMsg::market_price("IBM.N").service_name("FEED").service_list("SVG1");
        assert_eq!(ServiceSelector::from_request(&request), ServiceSelector::List("SVG1".to_string()));
        assert_eq!(ServiceSelector::from_request(&RequestMsg::market_price("IBM.N").service_id(7)), ServiceSelector::Id(7));
        assert_eq!(ServiceSelector::from_request(&RequestMsg::market_price("IBM.N")), ServiceSelector::Unspecified);
    }

    #[test]
    fn test_app_key_and_wire_request() {
        let mut item = ItemRequestState::new(Handle(1), None, RequestMsg::market_price("IBM.N").service_name("DIRECT_FEED"));
        item.learn_service(32767, "DIRECT_FEED");

        let key = item.app_key(&MsgKey::named("IBM.N").with_service_id(3));
        assert_eq!(key.service_id, Some(32767));
        assert_eq!(key.service_name.as_deref(), Some("DIRECT_FEED"));

        let binding = Binding { channel: ChannelId(0), stream_id: 9, service_id: 32767, service_name: "DIRECT_FEED".to_string(), provider_service_id: 3 };
        let wire = item.wire_request(&binding);
        assert_eq!(wire.stream_id, 9);
        assert_eq!(wire.key.service_id, Some(3));
        assert_eq!(wire.key.service_name, None);
    }
}
