//! # omm_sim
//!
//! In-memory provider side of the transport, used by tests and the demo consumer.
//! Each named provider answers login, directory, dictionary and item requests the
//! way a well-behaved upstream would, and can be scripted to fail.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use omm_types::AckMsg;
use omm_types::ChannelConfig;
use omm_types::ChannelId;
use omm_types::DataState;
use omm_types::DirectoryMsg;
use omm_types::DomainType;
use omm_types::GenericMsg;
use omm_types::MapAction;
use omm_types::Msg;
use omm_types::MsgKey;
use omm_types::OmmState;
use omm_types::RefreshMsg;
use omm_types::RequestMsg;
use omm_types::ServiceEntry;
use omm_types::ServiceUpdate;
use omm_types::StandbyRole;
use omm_types::StatusCode;
use omm_types::StatusMsg;
use omm_types::StreamState;
use omm_types::Transport;
use omm_types::TransportError;
use omm_types::TransportEvent;
use omm_types::TransportEventSender;
use omm_types::UpdateMsg;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

/// Behaviour of one simulated provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Accept connection attempts
    pub reachable: bool,

    /// Answer login requests with an Open/Ok refresh, otherwise reject them
    pub accept_login: bool,

    /// Answer item requests with a refresh
    pub auto_refresh: bool,

    /// Acknowledge posts that solicit an ack
    pub ack_posts: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { reachable: true, accept_login: true, auto_refresh: true, ack_posts: true }
    }
}

#[derive(Debug)]
struct SimProvider {
    config: ProviderConfig,
    services: Vec<ServiceEntry>,
    connected: Option<ChannelId>,
    connects: u32,
}

#[derive(Debug, Default)]
struct SimState {
    events: Option<TransportEventSender>,
    providers: HashMap<String, SimProvider>,
    /// Channel ids handed out by the session, keyed back to the provider name
    channels: HashMap<ChannelId, String>,
    sent: Vec<(String, Msg)>,
}

impl SimState {
    fn push(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn provider_for(&mut self, channel: ChannelId) -> Option<(&String, &mut SimProvider)> {
        let name = self.channels.get(&channel)?;
        let provider = self.providers.get_mut(name)?;
        Some((name, provider))
    }
}

/// Test-side handle onto a set of simulated providers
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport end to hand to the session; providers are matched by channel name
    pub fn transport(&self) -> SimTransport {
        SimTransport { inner: Arc::clone(&self.inner) }
    }

    pub fn add_provider(&self, name: &str, services: Vec<ServiceEntry>) {
        self.add_provider_with(name, ProviderConfig::default(), services);
    }

    pub fn add_provider_with(&self, name: &str, config: ProviderConfig, services: Vec<ServiceEntry>) {
        let provider = SimProvider { config, services, connected: None, connects: 0 };
        self.inner.lock().providers.insert(name.to_string(), provider);
    }

    pub fn configure(&self, name: &str, update: impl FnOnce(&mut ProviderConfig)) {
        if let Some(provider) = self.inner.lock().providers.get_mut(name) {
            update(&mut provider.config);
        }
    }

    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.inner.lock().channels.iter().find(|(_, provider)| provider.as_str() == name).map(|(channel, _)| *channel)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.inner.lock().providers.get(name).is_some_and(|provider| provider.connected.is_some())
    }

    pub fn connect_count(&self, name: &str) -> u32 {
        self.inner.lock().providers.get(name).map_or(0, |provider| provider.connects)
    }

    /// Drops the connection from the provider side
    pub fn disconnect(&self, name: &str) {
        let mut state = self.inner.lock();
        let Some(channel) = state.providers.get_mut(name).and_then(|provider| provider.connected.take()) else {
            return;
        };
        info!(provider = name, %channel, "Simulated disconnect");
        state.push(TransportEvent::down(channel, "connection reset by peer"));
    }

    /// Delivers an arbitrary message to the consumer on the provider's connection
    pub fn send_to_consumer(&self, name: &str, msg: Msg) {
        let state = self.inner.lock();
        if let Some(channel) = state.providers.get(name).and_then(|provider| provider.connected) {
            state.push(TransportEvent::message(channel, msg));
        }
    }

    /// Applies directory changes to the provider and publishes them when connected
    pub fn update_directory(&self, name: &str, updates: Vec<ServiceUpdate>) {
        let mut state = self.inner.lock();
        let Some(provider) = state.providers.get_mut(name) else {
            return;
        };

        for update in &updates {
            apply_update(&mut provider.services, update);
        }

        if let Some(channel) = provider.connected {
            let msg = Msg::Directory(DirectoryMsg::Update { stream_id: omm_types::streams::DIRECTORY, updates });
            state.push(TransportEvent::message(channel, msg));
        }
    }

    /// Login-based warm standby signal
    pub fn signal_standby(&self, name: &str, role: StandbyRole) {
        self.send_to_consumer(name, Msg::Generic(GenericMsg::login_standby(role)));
    }

    /// Service-based warm standby signal
    pub fn signal_service_standby(&self, name: &str, service: &str, role: StandbyRole) {
        self.send_to_consumer(name, Msg::Generic(GenericMsg::service_standby(service, role)));
    }

    /// Sends an update on an item stream
    pub fn publish_update(&self, name: &str, stream_id: i32, payload: &'static [u8]) {
        let update = UpdateMsg { stream_id, domain: DomainType::MarketPrice, key: MsgKey::default(), payload: Bytes::from_static(payload) };
        self.send_to_consumer(name, Msg::Update(update));
    }

    /// Sends a status on an item stream
    pub fn publish_status(&self, name: &str, stream_id: i32, state: OmmState) {
        self.send_to_consumer(name, Msg::Status(StatusMsg::new(stream_id, DomainType::MarketPrice, MsgKey::default(), state)));
    }

    /// Everything the consumer sent to `name`, oldest first
    pub fn sent(&self, name: &str) -> Vec<Msg> {
        self.inner.lock().sent.iter().filter(|(provider, _)| provider == name).map(|(_, msg)| msg.clone()).collect()
    }

    /// Item requests (non-administrative domains) the consumer sent to `name`
    pub fn item_requests(&self, name: &str) -> Vec<RequestMsg> {
        self.sent(name)
            .into_iter()
            .filter_map(|msg| match msg {
                Msg::Request(request) if !request.domain.is_administrative() => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self, name: &str) -> Vec<i32> {
        self.sent(name)
            .into_iter()
            .filter_map(|msg| match msg {
                Msg::Close(close) => Some(close.stream_id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }
}

fn apply_update(services: &mut Vec<ServiceEntry>, update: &ServiceUpdate) {
    let position = services.iter().position(|entry| entry.service_id == update.service_id);
    match (update.action, position) {
        (MapAction::Delete, Some(index)) => {
            services.remove(index);
        }
        (MapAction::Add, None) => {
            if let Some(info) = &update.info {
                let mut entry = ServiceEntry::new(update.service_id, info.clone());
                if let Some(status) = &update.status {
                    entry.status = status.clone();
                }
                entry.group_id = update.group_id.clone();
                services.push(entry);
            }
        }
        (MapAction::Add | MapAction::Update, Some(index)) => {
            let entry = &mut services[index];
            if let Some(info) = &update.info {
                entry.info = info.clone();
            }
            if let Some(status) = &update.status {
                entry.status = status.clone();
            }
            if let Some(group_id) = &update.group_id {
                entry.group_id = Some(group_id.clone());
            }
        }
        _ => {}
    }
}

/// Consumer-side end of the simulated network
#[derive(Debug)]
pub struct SimTransport {
    inner: Arc<Mutex<SimState>>,
}

impl SimTransport {
    fn respond(provider: &SimProvider, msg: &Msg) -> Vec<Msg> {
        match msg {
            Msg::Request(request) => Self::respond_to_request(provider, request),
            Msg::Post(post) if post.solicit_ack && provider.config.ack_posts => {
                let mut ack = AckMsg::ack(post.stream_id, post.domain, post.post_id);
                ack.key = post.key.clone();
                vec![Msg::Ack(ack)]
            }
            _ => Vec::new(),
        }
    }

    fn respond_to_request(provider: &SimProvider, request: &RequestMsg) -> Vec<Msg> {
        match request.domain {
            DomainType::Login if provider.config.accept_login => {
                vec![Msg::Refresh(RefreshMsg::new(request.stream_id, DomainType::Login, request.key.clone(), OmmState::open_ok("Login accepted")))]
            }
            DomainType::Login => {
                let state = OmmState::new(StreamState::Closed, DataState::Suspect, StatusCode::NotAuthorized, "Login denied");
                vec![Msg::Status(StatusMsg::new(request.stream_id, DomainType::Login, request.key.clone(), state))]
            }
            DomainType::Source => vec![Msg::Directory(DirectoryMsg::Refresh { stream_id: request.stream_id, services: provider.services.clone() })],
            DomainType::Dictionary => {
                vec![Msg::Refresh(RefreshMsg::new(request.stream_id, DomainType::Dictionary, request.key.clone(), OmmState::open_ok("Dictionary complete")))]
            }
            _ if provider.config.auto_refresh => {
                let group = request
                    .key
                    .service_id
                    .and_then(|service_id| provider.services.iter().find(|entry| entry.service_id == service_id))
                    .and_then(|entry| entry.group_id.clone());
                let mut refresh = RefreshMsg::new(request.stream_id, request.domain, request.key.clone(), OmmState::open_ok("All is well"));
                refresh.qos = Some(request.qos.unwrap_or_default());
                refresh.private_stream = request.private_stream;
                refresh.item_group = group;
                vec![Msg::Refresh(refresh)]
            }
            _ => Vec::new(),
        }
    }
}

impl Transport for SimTransport {
    fn attach(&mut self, events: TransportEventSender) {
        self.inner.lock().events = Some(events);
    }

    fn connect(&mut self, channel: ChannelId, config: &ChannelConfig) -> omm_types::errors::Result<()> {
        let mut state = self.inner.lock();
        state.channels.insert(channel, config.name.clone());

        let Some(provider) = state.providers.get_mut(&config.name) else {
            return Err(TransportError::ConnectFailed { channel, address: config.address(), reason: "no such provider".to_string() });
        };
        provider.connects += 1;
        if !provider.config.reachable {
            return Err(TransportError::ConnectFailed { channel, address: config.address(), reason: "connection refused".to_string() });
        }

        provider.connected = Some(channel);
        debug!(provider = %config.name, %channel, "Simulated connect");
        state.push(TransportEvent::up(channel));
        Ok(())
    }

    fn send(&mut self, channel: ChannelId, msg: Msg) -> omm_types::errors::Result<()> {
        let mut state = self.inner.lock();
        let Some((name, provider)) = state.provider_for(channel) else {
            return Err(TransportError::NotConnected(channel));
        };
        if provider.connected != Some(channel) {
            return Err(TransportError::NotConnected(channel));
        }

        let name = name.clone();
        let responses = Self::respond(provider, &msg);
        state.sent.push((name, msg));
        for response in responses {
            state.push(TransportEvent::message(channel, response));
        }
        Ok(())
    }

    fn close(&mut self, channel: ChannelId) {
        let mut state = self.inner.lock();
        if let Some((name, provider)) = state.provider_for(channel) {
            if provider.connected == Some(channel) {
                debug!(provider = %name, %channel, "Simulated close");
                provider.connected = None;
            }
        }
    }
}
