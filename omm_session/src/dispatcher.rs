use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::select;
use crossbeam_channel::Receiver;
use omm_directory::DirectoryAggregator;
use omm_directory::DirectoryEvent;
use omm_directory::ServiceList;
use omm_directory::ServiceLists;
use omm_types::streams;
use omm_types::ChannelEvent;
use omm_types::ChannelId;
use omm_types::CloseMsg;
use omm_types::DirectoryMsg;
use omm_types::DomainType;
use omm_types::GenericMsg;
use omm_types::Handle;
use omm_types::Msg;
use omm_types::MsgKey;
use omm_types::OmmState;
use omm_types::PostMsg;
use omm_types::RefreshMsg;
use omm_types::RequestMsg;
use omm_types::ServiceEntry;
use omm_types::ServiceUpdate;
use omm_types::StandbyRole;
use omm_types::StandbySignal;
use omm_types::StatusCode;
use omm_types::StatusMsg;
use omm_types::Transport;
use omm_types::TransportEvent;
use rapidhash::RapidHashMap;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::channel::ChannelSession;
use crate::channel::ChannelState;
use crate::client::dispatch_to;
use crate::client::ConsumerClient;
use crate::client::ConsumerEvent;
use crate::clock::Clock;
use crate::commands::Command;
use crate::config::SessionConfig;
use crate::outbox::Outbox;
use crate::preferred_host::FallbackPlan;
use crate::preferred_host::PreferredHostController;
use crate::recovery::RecoveryManager;
use crate::recovery::ReconnectDecision;
use crate::router::ItemRouter;
use crate::router::RouteContext;
use crate::shared::SharedHandle;
use crate::timer::TimerKind;
use crate::timer::TimerQueue;
use crate::warm_standby::WarmStandbyGroup;

const FIELD_DICTIONARY: &str = "RWFFld";
const ENUM_DICTIONARY: &str = "RWFEnum";

/// Builds a [`RouteContext`] from disjoint fields so the router and outbox stay mutably borrowable
macro_rules! route_ctx {
    ($self:ident) => {
        RouteContext { directory: &$self.directory, channels: &$self.channels, groups: &$self.groups, service_lists: &$self.service_lists }
    };
}

/// Which services a directory subscription wants to see
#[derive(Debug, Clone, PartialEq, Eq)]
enum DirectoryFilter {
    All,
    Name(String),
    Id(u16),
}

impl DirectoryFilter {
    fn from_key(key: &MsgKey) -> Self {
        match (&key.service_name, key.service_id) {
            (Some(name), _) => DirectoryFilter::Name(name.clone()),
            (None, Some(id)) => DirectoryFilter::Id(id),
            (None, None) => DirectoryFilter::All,
        }
    }

    fn matches(&self, service_id: u16, name: &str) -> bool {
        match self {
            DirectoryFilter::All => true,
            DirectoryFilter::Name(wanted) => wanted == name,
            DirectoryFilter::Id(wanted) => *wanted == service_id,
        }
    }
}

/// Dictionary download in progress on one channel
#[derive(Debug, Clone, Copy)]
struct DictionaryDownload {
    channel: ChannelId,
    outstanding: usize,
}

/// Single owner of all routing state; every transport event and application intent goes through here
pub struct Dispatcher {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    events: Receiver<TransportEvent>,
    commands: Receiver<Command>,
    shared: SharedHandle,
    directory: DirectoryAggregator,
    service_lists: ServiceLists,
    channels: Vec<ChannelSession>,
    groups: Vec<WarmStandbyGroup>,
    router: ItemRouter,
    recovery: RecoveryManager,
    preferred: PreferredHostController,
    timers: TimerQueue,
    clients: RapidHashMap<Handle, Box<dyn ConsumerClient>>,
    login_handles: Vec<Handle>,
    directory_handles: Vec<(Handle, DirectoryFilter)>,
    login_refresh: Option<RefreshMsg>,
    login_open: bool,
    dictionary: Option<DictionaryDownload>,
    dictionary_loaded: bool,
    outbox: Outbox,
    shutdown: bool,
}

impl Dispatcher {
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        events: Receiver<TransportEvent>,
        commands: Receiver<Command>,
        shared: SharedHandle,
    ) -> Self {
        let mut channels: Vec<ChannelSession> =
            config.channels.iter().enumerate().map(|(index, channel)| ChannelSession::new(ChannelId(index as u32), channel.clone())).collect();

        let mut directory = DirectoryAggregator::new();
        let list_ids = directory.reserve_ids(config.service_lists.iter().map(|list| list.name.as_str()));
        let service_lists = ServiceLists::new(
            config
                .service_lists
                .iter()
                .zip(list_ids)
                .map(|(list, service_id)| ServiceList { name: list.name.clone(), service_id, services: list.services.clone() })
                .collect(),
        );

        let mut groups = Vec::with_capacity(config.warm_standby_groups.len());
        for (index, group) in config.warm_standby_groups.iter().enumerate() {
            let mut members = Vec::new();
            for (position, name) in group.members().enumerate() {
                let Some(channel) = config.channel_index(name) else {
                    continue;
                };
                channels[channel].group = Some(index);
                let role = if position == 0 { StandbyRole::Active } else { StandbyRole::Standby };
                members.push((ChannelId(channel as u32), role));
            }
            groups.push(WarmStandbyGroup::new(group.name.clone(), group.mode, members));
        }

        let mut preferred_ids = Vec::new();
        let mut interval = None;
        if let Some(preferred) = &config.preferred_host {
            preferred_ids.extend(preferred.channels.iter().filter_map(|name| config.channel_index(name)).map(|index| ChannelId(index as u32)));
            if let Some(group) = preferred.group.as_ref().and_then(|name| groups.iter().find(|group| &group.name == name)) {
                preferred_ids.extend(group.channels());
            }
            interval = preferred.detection_interval_secs.filter(|secs| *secs > 0).map(Duration::from_secs);
        }
        for channel in &preferred_ids {
            channels[channel.index()].preferred = true;
        }

        Self {
            router: ItemRouter::new(config.request_timeout()),
            recovery: RecoveryManager::new(config.reconnect),
            preferred: PreferredHostController::new(preferred_ids, interval),
            config,
            transport,
            clock,
            events,
            commands,
            shared,
            directory,
            service_lists,
            channels,
            groups,
            timers: TimerQueue::new(),
            clients: RapidHashMap::default(),
            login_handles: Vec::new(),
            directory_handles: Vec::new(),
            login_refresh: None,
            login_open: false,
            dictionary: None,
            dictionary_loaded: false,
            outbox: Outbox::default(),
            shutdown: false,
        }
    }

    /// Connects every configured channel and arms the preferred-host schedule
    pub fn start(&mut self) {
        info!(session = %self.config.name, channels = self.channels.len(), groups = self.groups.len(), "Starting consumer session");
        for index in 0..self.channels.len() {
            self.connect_channel(ChannelId(index as u32));
        }
        if let Some(interval) = self.preferred.interval() {
            self.timers.schedule(self.clock.now() + interval, TimerKind::PreferredHostCheck);
        }
        self.publish_channels();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn channel_states(&self) -> Vec<ChannelState> {
        self.channels.iter().map(ChannelSession::state).collect()
    }

    /// Waits up to `timeout` for input, then handles everything queued and every due timer
    ///
    /// Returns the number of events, commands and timers handled.
    pub fn dispatch(&mut self, timeout: Duration) -> usize {
        let wait = match self.timers.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(self.clock.now()).min(timeout),
            None => timeout,
        };

        let events = self.events.clone();
        let commands = self.commands.clone();
        let mut handled = 0;
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    self.on_event(event);
                    handled += 1;
                }
            }
            recv(commands) -> command => {
                if let Ok(command) = command {
                    self.on_command(command);
                    handled += 1;
                }
            }
            default(wait) => {}
        }

        loop {
            let mut progressed = 0;
            while let Ok(command) = commands.try_recv() {
                self.on_command(command);
                progressed += 1;
            }
            while let Ok(event) = events.try_recv() {
                self.on_event(event);
                progressed += 1;
            }
            progressed += self.fire_timers();
            if progressed == 0 {
                break;
            }
            handled += progressed;
        }

        if handled > 0 {
            self.publish_channels();
        }
        handled
    }

    /// Closes every connection; no further callbacks are made
    pub fn shutdown(&mut self) {
        self.shutdown = true;
        for index in 0..self.channels.len() {
            let channel = ChannelId(index as u32);
            if self.channels[index].state().is_live() {
                self.transport.close(channel);
            }
            self.channels[index].set_state(ChannelState::Closed);
        }
        self.publish_channels();
        info!(session = %self.config.name, "Consumer session shut down");
    }

    fn on_event(&mut self, event: TransportEvent) {
        let channel = event.channel;
        if channel.index() >= self.channels.len() {
            warn!(%channel, "Event for unknown channel");
            return;
        }

        match event.event {
            ChannelEvent::Up => self.on_channel_up(channel),
            ChannelEvent::Down { reason } => {
                if self.channels[channel.index()].parked {
                    debug!(%channel, "Parked channel reported down");
                } else {
                    self.lose_channel(channel, &reason, false);
                }
            }
            ChannelEvent::Message(msg) => self.on_channel_message(channel, msg),
        }
        self.flush();
    }

    fn on_command(&mut self, command: Command) {
        trace!(command = command.name(), "Command");
        match command {
            Command::Register { handle, request, client, children } => self.register(handle, request, client, children),
            Command::Reissue { handle, request } => {
                let ctx = route_ctx!(self);
                self.router.reissue(handle, request, &ctx, &mut self.outbox);
            }
            Command::Unregister { handle, children } => self.unregister(handle, children),
            Command::SubmitPost { handle, post, service_id } => self.submit_post(handle, post, service_id),
            Command::SubmitGeneric { handle, generic } => self.submit_generic(handle, generic),
            Command::FallbackPreferredHost => self.fallback_preferred_host(),
            Command::Shutdown => self.shutdown = true,
        }
        self.flush();
    }

    fn fire_timers(&mut self) -> usize {
        let due = self.timers.pop_due(self.clock.now());
        let fired = due.len();
        for timer in due {
            match timer {
                TimerKind::RequestTimeout { handle, epoch } => {
                    let ctx = route_ctx!(self);
                    self.router.on_timeout(handle, epoch, &ctx, &mut self.outbox);
                }
                TimerKind::RetryRequest { handle, epoch } => {
                    let ctx = route_ctx!(self);
                    self.router.on_retry(handle, epoch, &ctx, &mut self.outbox);
                }
                TimerKind::Reconnect { channel } => {
                    let session = &mut self.channels[channel.index()];
                    session.reconnect_timer = None;
                    if session.state() == ChannelState::Reconnecting {
                        self.connect_channel(channel);
                    }
                }
                TimerKind::PreferredHostCheck => {
                    self.fallback_preferred_host();
                    if let Some(interval) = self.preferred.interval() {
                        self.timers.schedule(self.clock.now() + interval, TimerKind::PreferredHostCheck);
                    }
                }
            }
            self.flush();
        }
        fired
    }

    fn register(&mut self, handle: Handle, request: RequestMsg, client: Box<dyn ConsumerClient>, children: Vec<Handle>) {
        self.clients.insert(handle, client);

        match request.domain {
            DomainType::Login => {
                self.login_handles.push(handle);
                if self.login_open {
                    if let Some(refresh) = &self.login_refresh {
                        self.outbox.deliver(handle, Msg::Refresh(refresh.clone()));
                    }
                }
            }
            DomainType::Source => {
                let filter = DirectoryFilter::from_key(&request.key);
                let services = self.directory.view().into_iter().filter(|entry| filter.matches(entry.service_id, entry.name())).collect();
                self.outbox.deliver(handle, Msg::Directory(DirectoryMsg::Refresh { stream_id: 0, services }));
                self.directory_handles.push((handle, filter));
            }
            _ if request.is_batch() => {
                let names = request.batch.clone();
                for (child, name) in children.into_iter().zip(names) {
                    let mut single = request.clone();
                    single.batch.clear();
                    single.key.name = Some(name);
                    let ctx = route_ctx!(self);
                    self.router.open(child, Some(handle), single, &ctx, &mut self.outbox);
                }
            }
            _ => {
                let ctx = route_ctx!(self);
                self.router.open(handle, None, request, &ctx, &mut self.outbox);
            }
        }
    }

    fn unregister(&mut self, handle: Handle, children: Vec<Handle>) {
        self.clients.remove(&handle);
        self.login_handles.retain(|login| *login != handle);
        self.directory_handles.retain(|(directory, _)| *directory != handle);

        let ctx = route_ctx!(self);
        for item in std::iter::once(handle).chain(children) {
            if self.router.close(item, &ctx, &mut self.outbox) {
                debug!(handle = %item, "Item unregistered");
            }
        }
    }

    fn submit_post(&mut self, handle: Handle, post: PostMsg, service_id: Option<u16>) {
        match service_id {
            Some(service_id) => {
                let ctx = route_ctx!(self);
                if self.router.post_off_stream(handle, post, service_id, &ctx, &mut self.outbox) == 0 {
                    warn!(%handle, service_id, "Off-stream post reached no channel");
                }
            }
            None => {
                self.router.submit_post(handle, post, &mut self.outbox);
            }
        }
    }

    fn submit_generic(&mut self, handle: Handle, generic: GenericMsg) {
        if !self.login_handles.contains(&handle) {
            self.router.submit_generic(handle, generic, &mut self.outbox);
            return;
        }
        for channel in self.channels.iter().filter(|channel| channel.state().is_logged_in()) {
            let mut msg = generic.clone();
            msg.stream_id = streams::LOGIN;
            self.outbox.send(channel.id, Msg::Generic(msg));
        }
    }

    fn connect_channel(&mut self, channel: ChannelId) {
        let session = &mut self.channels[channel.index()];
        session.set_state(ChannelState::Connecting);
        if let Some(timer) = session.reconnect_timer.take() {
            self.timers.cancel(timer);
        }

        info!(%channel, name = %session.name(), address = %session.config.address(), "Connecting channel");
        if let Err(err) = self.transport.connect(channel, &session.config) {
            error!(%channel, error = %err, "Channel connect failed");
            self.lose_channel(channel, &err.to_string(), false);
        }
    }

    fn on_channel_up(&mut self, channel: ChannelId) {
        let session = &self.channels[channel.index()];
        if session.state() != ChannelState::Connecting {
            debug!(%channel, state = ?session.state(), "Stale channel up ignored");
            return;
        }

        let mut login = RequestMsg::new(DomainType::Login).name(self.config.user_name.clone());
        login.stream_id = streams::LOGIN;
        debug!(%channel, user = %self.config.user_name, "Sending login");
        self.outbox.send(channel, Msg::Request(login));
    }

    fn on_channel_message(&mut self, channel: ChannelId, msg: Msg) {
        if !self.channels[channel.index()].state().is_live() {
            trace!(%channel, kind = msg.kind(), "Message on a down channel dropped");
            return;
        }

        match msg.stream_id() {
            streams::LOGIN => self.on_login_message(channel, msg),
            streams::DIRECTORY => self.on_directory_message(channel, msg),
            streams::FIELD_DICTIONARY | streams::ENUM_DICTIONARY => self.on_dictionary_message(channel, msg),
            _ => {
                let ctx = route_ctx!(self);
                if !self.router.on_message(channel, msg, &ctx, &mut self.outbox) {
                    trace!(%channel, "Message for a stream no longer open");
                }
            }
        }
    }

    fn on_login_message(&mut self, channel: ChannelId, msg: Msg) {
        match msg {
            Msg::Refresh(refresh) if !refresh.state.is_final() => {
                if self.channels[channel.index()].state() != ChannelState::Connecting {
                    return;
                }
                info!(%channel, state = %refresh.state, "Login accepted");
                self.channels[channel.index()].set_state(ChannelState::LoggedIn);
                if self.login_refresh.is_none() {
                    let mut refresh = refresh;
                    refresh.stream_id = 0;
                    self.login_refresh = Some(refresh);
                }

                let mut request = RequestMsg::new(DomainType::Source);
                request.stream_id = streams::DIRECTORY;
                self.outbox.send(channel, Msg::Request(request));
                self.update_login_state();
            }
            Msg::Refresh(RefreshMsg { state, .. }) | Msg::Status(StatusMsg { state: Some(state), .. }) if state.is_final() => {
                warn!(%channel, state = %state, "Login rejected");
                self.channels[channel.index()].reconnect_allowed = false;
                self.lose_channel(channel, &state.text, true);
            }
            Msg::Generic(generic) => match &generic.standby {
                Some(signal) => self.on_standby_signal(channel, signal.clone()),
                None => {
                    for handle in &self.login_handles {
                        let mut msg = generic.clone();
                        msg.stream_id = 0;
                        self.outbox.deliver(*handle, Msg::Generic(msg));
                    }
                }
            },
            Msg::Ack(ack) => match self.router.on_login_ack(channel, ack) {
                Some((handle, msg)) => self.outbox.deliver(handle, msg),
                None => debug!(%channel, "Ack for an unknown off-stream post"),
            },
            other => debug!(%channel, kind = other.kind(), "Login stream message ignored"),
        }
    }

    fn on_directory_message(&mut self, channel: ChannelId, msg: Msg) {
        match msg {
            Msg::Directory(DirectoryMsg::Refresh { services, .. }) => {
                debug!(%channel, services = services.len(), "Directory refresh");
                let dictionary_source = self.dictionary_source(&services);
                let events = self.directory.on_directory_refresh(channel, services);
                self.process_directory_events(events);

                if self.channels[channel.index()].state() == ChannelState::LoggedIn {
                    self.channels[channel.index()].set_state(ChannelState::DirectoryReady);
                    match dictionary_source {
                        Some(provider_id) => self.request_dictionaries(channel, provider_id),
                        None => self.activate(channel),
                    }
                }
            }
            Msg::Directory(DirectoryMsg::Update { updates, .. }) => {
                debug!(%channel, updates = updates.len(), "Directory update");
                let events = self.directory.on_directory_update(channel, updates);
                self.process_directory_events(events);
            }
            Msg::Directory(DirectoryMsg::Status { state, .. }) => info!(%channel, state = %state, "Directory status"),
            Msg::Generic(generic) => match generic.standby {
                Some(signal) => self.on_standby_signal(channel, signal),
                None => debug!(%channel, "Directory generic message ignored"),
            },
            other => debug!(%channel, kind = other.kind(), "Directory stream message ignored"),
        }
    }

    /// Provider service id to download dictionaries from, if this channel should do it
    fn dictionary_source(&self, services: &[ServiceEntry]) -> Option<u16> {
        if !self.config.download_dictionary || self.dictionary_loaded || self.dictionary.is_some() {
            return None;
        }
        services
            .iter()
            .find(|entry| entry.info.dictionaries_provided.iter().any(|name| name == FIELD_DICTIONARY || name == ENUM_DICTIONARY))
            .map(|entry| entry.service_id)
    }

    fn request_dictionaries(&mut self, channel: ChannelId, provider_id: u16) {
        for (stream_id, name) in [(streams::FIELD_DICTIONARY, FIELD_DICTIONARY), (streams::ENUM_DICTIONARY, ENUM_DICTIONARY)] {
            let mut request = RequestMsg::new(DomainType::Dictionary).name(name).service_id(provider_id).interest_after_refresh(false);
            request.stream_id = stream_id;
            self.outbox.send(channel, Msg::Request(request));
        }
        info!(%channel, service_id = provider_id, "Requesting dictionaries");
        self.dictionary = Some(DictionaryDownload { channel, outstanding: 2 });
    }

    fn on_dictionary_message(&mut self, channel: ChannelId, msg: Msg) {
        let Some(download) = self.dictionary.as_mut().filter(|download| download.channel == channel) else {
            return;
        };
        match msg {
            Msg::Refresh(refresh) if refresh.complete => {
                download.outstanding = download.outstanding.saturating_sub(1);
                info!(%channel, name = ?refresh.key.name, "Dictionary received");
            }
            Msg::Status(status) => {
                warn!(%channel, state = ?status.state, "Dictionary request failed");
                download.outstanding = download.outstanding.saturating_sub(1);
            }
            _ => return,
        }

        if download.outstanding == 0 {
            self.dictionary = None;
            self.dictionary_loaded = true;
            if self.channels[channel.index()].state() == ChannelState::DirectoryReady {
                self.activate(channel);
            }
        }
    }

    fn activate(&mut self, channel: ChannelId) {
        let session = &mut self.channels[channel.index()];
        session.set_state(ChannelState::Active);
        self.recovery.on_active(session);

        let ctx = route_ctx!(self);
        self.router.on_channel_active(channel, &ctx, &mut self.outbox);

        let plan = self.preferred.on_channel_active(channel, &self.channels);
        self.apply_plan(plan);
    }

    fn on_standby_signal(&mut self, channel: ChannelId, signal: StandbySignal) {
        let Some(index) = self.channels[channel.index()].group else {
            debug!(%channel, "Standby signal on a channel outside any warm standby group");
            return;
        };
        let Some(promotion) = self.groups[index].apply_signal(channel, &signal) else {
            return;
        };

        info!(group = %self.groups[index].name, %channel, service = ?promotion.service, "Warm standby member promoted");
        let members = self.groups[index].channels();
        let ctx = route_ctx!(self);
        self.router.resync_group(&members, promotion.channel, promotion.service.as_deref(), &ctx, &mut self.outbox);
    }

    /// Connection lost (or login rejected): recover items, then reconnect or give up
    fn lose_channel(&mut self, channel: ChannelId, reason: &str, reachable: bool) {
        let session = &self.channels[channel.index()];
        if !session.state().is_live() {
            return;
        }
        warn!(%channel, name = %session.name(), reason, "Channel lost");

        let will_reconnect = self.recovery.will_reconnect(session);
        let group = session.group;
        if let Some(timer) = self.channels[channel.index()].reconnect_timer.take() {
            self.timers.cancel(timer);
        }
        self.channels[channel.index()].set_state(ChannelState::Reconnecting);
        if self.dictionary.is_some_and(|download| download.channel == channel) {
            self.dictionary = None;
        }

        if let Some(index) = group {
            self.groups[index].reset_member(channel);
            self.promote_standby(index);
        }

        let events = self.directory.on_channel_lost(channel);
        let ctx = route_ctx!(self);
        self.router.on_channel_lost(
            channel,
            reachable,
            |private| RecoveryManager::classify(private, group.is_some(), will_reconnect),
            &ctx,
            &mut self.outbox,
        );
        self.process_directory_events(events);

        if reachable {
            self.outbox.send(channel, Msg::Close(CloseMsg { stream_id: streams::LOGIN, domain: DomainType::Login }));
        }

        match self.recovery.on_disconnect(&mut self.channels[channel.index()]) {
            ReconnectDecision::After(delay) => {
                let timer = self.timers.schedule(self.clock.now() + delay, TimerKind::Reconnect { channel });
                self.channels[channel.index()].reconnect_timer = Some(timer);
            }
            ReconnectDecision::GiveUp => {
                self.channels[channel.index()].set_state(ChannelState::Closed);
                self.router.on_channel_given_up(channel, &mut self.outbox);
                if reachable {
                    self.flush();
                    self.transport.close(channel);
                }
            }
        }

        self.update_login_state();
        let revived = self.preferred.revive(&self.channels);
        for channel in revived {
            info!(%channel, "Reviving parked channel, no preferred channel is left");
            self.channels[channel.index()].parked = false;
            self.connect_channel(channel);
        }
    }

    /// Without an active member left, the first usable member takes over
    fn promote_standby(&mut self, index: usize) {
        let channels = &self.channels;
        let group = &mut self.groups[index];
        let usable = |member: ChannelId| channels[member.index()].is_active();
        if group.members.iter().any(|member| member.role == StandbyRole::Active && usable(member.channel)) {
            return;
        }
        let Some(next) = group.members.iter().map(|member| member.channel).find(|member| usable(*member)) else {
            return;
        };
        info!(group = %group.name, channel = %next, "Standby member takes over");
        // Items of the lost member are rerouted by on_channel_lost, the promotion has nothing to resync
        group.apply_signal(next, &StandbySignal { role: StandbyRole::Active, service_name: None });
    }

    fn fallback_preferred_host(&mut self) {
        if !self.preferred.is_configured() {
            debug!("Preferred host fallback requested without preferred channels");
            return;
        }
        let plan = self.preferred.plan(&self.channels);
        self.apply_plan(plan);
    }

    fn apply_plan(&mut self, plan: FallbackPlan) {
        for channel in plan.connect {
            self.channels[channel.index()].parked = false;
            self.connect_channel(channel);
        }
        for channel in plan.park {
            self.park_channel(channel);
        }
    }

    /// Gracefully logs a non-preferred channel out and keeps it down
    fn park_channel(&mut self, channel: ChannelId) {
        info!(%channel, name = %self.channels[channel.index()].name(), "Parking non-preferred channel");
        let group = self.channels[channel.index()].group;
        let session = &mut self.channels[channel.index()];
        session.parked = true;
        if let Some(timer) = session.reconnect_timer.take() {
            self.timers.cancel(timer);
        }
        let reachable = session.state().is_live();
        session.set_state(ChannelState::Closed);

        if let Some(index) = group {
            self.groups[index].reset_member(channel);
            self.promote_standby(index);
        }

        let events = self.directory.on_channel_lost(channel);
        let ctx = route_ctx!(self);
        self.router.on_channel_lost(channel, reachable, |private| RecoveryManager::classify(private, group.is_some(), false), &ctx, &mut self.outbox);
        self.router.on_channel_given_up(channel, &mut self.outbox);
        self.process_directory_events(events);

        if reachable {
            self.outbox.send(channel, Msg::Close(CloseMsg { stream_id: streams::LOGIN, domain: DomainType::Login }));
            self.flush();
            self.transport.close(channel);
        }
        self.update_login_state();
    }

    fn process_directory_events(&mut self, events: Vec<DirectoryEvent>) {
        if events.is_empty() {
            return;
        }

        for event in &events {
            let ctx = route_ctx!(self);
            match event {
                DirectoryEvent::SourceRemoved { service_id, channel } => {
                    let reachable = self.channels[channel.index()].state().is_live();
                    self.router.on_service_unavailable(*service_id, *channel, reachable, &ctx, &mut self.outbox);
                }
                DirectoryEvent::SourceStatusChanged { service_id, channel, new, .. } if !new.is_serving() => {
                    self.router.on_service_unavailable(*service_id, *channel, true, &ctx, &mut self.outbox);
                }
                DirectoryEvent::GroupStatus { service_id, channel, group } => {
                    self.router.on_group_status(*service_id, *channel, group, &ctx, &mut self.outbox);
                }
                _ => {}
            }
        }

        self.notify_directory(&events);
        let ctx = route_ctx!(self);
        self.router.retry_pending(&ctx, &mut self.outbox);

        let services = self.directory.services().map(|service| (service.name.clone(), service.service_id)).collect();
        self.shared.lock().services = services;
    }

    fn notify_directory(&mut self, events: &[DirectoryEvent]) {
        if self.directory_handles.is_empty() {
            return;
        }

        let mut updates: Vec<(u16, String, ServiceUpdate)> = Vec::new();
        for event in events.iter().filter(|event| event.is_application_visible()) {
            match event {
                DirectoryEvent::ServiceAdded { service_id, name } => {
                    if let Some(service) = self.directory.service_by_id(*service_id) {
                        updates.push((*service_id, name.clone(), ServiceUpdate::add(service.to_entry())));
                    }
                }
                DirectoryEvent::ServiceDeleted { service_id, name } => updates.push((*service_id, name.clone(), ServiceUpdate::delete(*service_id))),
                DirectoryEvent::ServiceStateChanged { service_id, name, status } => {
                    updates.push((*service_id, name.clone(), ServiceUpdate::status(*service_id, status.clone())))
                }
                _ => {}
            }
        }
        if updates.is_empty() {
            return;
        }

        for (handle, filter) in &self.directory_handles {
            let matching: Vec<ServiceUpdate> =
                updates.iter().filter(|(service_id, name, _)| filter.matches(*service_id, name)).map(|(_, _, update)| update.clone()).collect();
            if !matching.is_empty() {
                self.outbox.deliver(*handle, Msg::Directory(DirectoryMsg::Update { stream_id: 0, updates: matching }));
            }
        }
    }

    /// The application sees one login stream, open while any channel is logged in
    fn update_login_state(&mut self) {
        let logged_in = self.channels.iter().any(|channel| channel.state().is_logged_in());
        if logged_in == self.login_open {
            return;
        }
        self.login_open = logged_in;

        let msg = if logged_in {
            match &self.login_refresh {
                Some(refresh) => Msg::Refresh(refresh.clone()),
                None => return,
            }
        } else {
            let key = MsgKey::named(self.config.user_name.clone());
            Msg::Status(StatusMsg::new(0, DomainType::Login, key, OmmState::open_suspect(StatusCode::ChannelDown, "All channels are down")))
        };
        for handle in &self.login_handles {
            self.outbox.deliver(*handle, msg.clone());
        }
    }

    /// Applies queued side effects: wire sends, timers, then application callbacks
    fn flush(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        let out = std::mem::take(&mut self.outbox);

        for (channel, msg) in out.sends {
            if let Err(err) = self.transport.send(channel, msg) {
                error!(%channel, error = %err, "Send failed");
            }
        }

        let now = self.clock.now();
        for (after, kind) in out.timers {
            self.timers.schedule(now + after, kind);
        }

        // Resolve targets first; callbacks must run without the shared lock held
        let targets: Vec<(Handle, Option<Handle>, Msg)> = {
            let shared = self.shared.lock();
            out.deliveries.into_iter().filter_map(|(handle, msg)| shared.handles.get(&handle).map(|entry| (handle, entry.parent, msg))).collect()
        };
        for (handle, parent, msg) in targets {
            let Some(client) = self.clients.get_mut(&parent.unwrap_or(handle)) else {
                continue;
            };
            dispatch_to(client.as_mut(), &msg, &ConsumerEvent { handle, parent });
        }

        if !out.closed.is_empty() {
            let mut shared = self.shared.lock();
            for handle in out.closed {
                if let Some(entry) = shared.remove(handle) {
                    if entry.parent.is_none() {
                        self.clients.remove(&handle);
                    }
                }
            }
        }
    }

    fn publish_channels(&self) {
        let infos = self
            .channels
            .iter()
            .map(|channel| {
                let group = channel.group.and_then(|index| self.groups.get(index));
                channel.info(group.map(|group| (group.name.as_str(), group.role_of(channel.id, None).unwrap_or(StandbyRole::Standby))))
            })
            .collect();
        self.shared.lock().channels = infos;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("session", &self.config.name)
            .field("channels", &self.channels.len())
            .field("items", &self.router.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}
