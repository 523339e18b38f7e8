use std::time::Duration;

use omm_directory::AggregatedService;
use omm_directory::DirectoryAggregator;
use omm_directory::ServiceLists;
use omm_types::streams;
use omm_types::AckMsg;
use omm_types::ChannelId;
use omm_types::CloseMsg;
use omm_types::DataState;
use omm_types::GenericMsg;
use omm_types::GroupStatus;
use omm_types::Handle;
use omm_types::Msg;
use omm_types::MsgKey;
use omm_types::OmmState;
use omm_types::PostMsg;
use omm_types::RefreshMsg;
use omm_types::RequestMsg;
use omm_types::StatusCode;
use omm_types::StatusMsg;
use omm_types::StreamId;
use omm_types::StreamState;
use rapidhash::RapidHashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::channel::ChannelSession;
use crate::item::Binding;
use crate::item::ItemRequestState;
use crate::item::Lifecycle;
use crate::item::ServiceSelector;
use crate::outbox::Outbox;
use crate::recovery::ItemRecovery;
use crate::timer::TimerKind;
use crate::warm_standby::WarmStandbyGroup;

/// Read-only view of everything a routing decision depends on
pub struct RouteContext<'a> {
    pub directory: &'a DirectoryAggregator,
    pub channels: &'a [ChannelSession],
    pub groups: &'a [WarmStandbyGroup],
    pub service_lists: &'a ServiceLists,
}

impl<'a> RouteContext<'a> {
    pub fn channel(&self, channel: ChannelId) -> Option<&'a ChannelSession> {
        self.channels.get(channel.index())
    }

    fn is_usable(&self, channel: ChannelId) -> bool {
        self.channel(channel).is_some_and(ChannelSession::is_active)
    }

    /// Channel may carry new requests for `service`; a warm standby group offers only its serving member
    pub fn is_routable(&self, channel: ChannelId, service: &str) -> bool {
        let Some(session) = self.channel(channel) else {
            return false;
        };
        if !session.is_active() {
            return false;
        }
        match session.group.and_then(|index| self.groups.get(index)) {
            Some(group) => group.serving_member(service, |member| self.is_usable(member)) == Some(channel),
            None => true,
        }
    }

    /// Channel is a routing candidate for the item: routable, serving, right domain and QoS
    pub fn qualifies(&self, channel: ChannelId, service: &AggregatedService, item: &ItemRequestState) -> bool {
        if !self.is_routable(channel, &service.name) {
            return false;
        }
        let Some(entry) = self.directory.source_entry(channel, service.service_id) else {
            return false;
        };
        entry.is_serving() && entry.info.supports(item.domain()) && item.requested_qos().is_satisfied_by(&entry.info.qos, entry.info.supports_qos_range)
    }

    /// Lowest-ordinal candidate not yet tried in this round
    fn first_candidate(&self, service: &AggregatedService, item: &ItemRequestState) -> Option<ChannelId> {
        service.channels().find(|channel| !item.tried.contains(channel) && self.qualifies(*channel, service, item))
    }
}

enum Resolution<'a> {
    Route { service: &'a AggregatedService, channel: ChannelId },
    Pending { code: StatusCode, text: String },
    Terminal { code: StatusCode, text: String },
}

/// Routes application items onto channels and keeps them there while the directory changes
#[derive(Debug, Default)]
pub struct ItemRouter {
    items: RapidHashMap<Handle, ItemRequestState>,
    streams: RapidHashMap<(ChannelId, StreamId), Handle>,
    next_stream: RapidHashMap<ChannelId, StreamId>,
    /// Off-stream posts awaiting an ack: (channel, post id) -> (handle, logical service id, service name)
    posts: RapidHashMap<(ChannelId, u32), (Handle, u16, String)>,
    request_timeout: Option<Duration>,
}

impl ItemRouter {
    pub fn new(request_timeout: Option<Duration>) -> Self {
        Self { request_timeout, ..Default::default() }
    }

    pub fn item(&self, handle: Handle) -> Option<&ItemRequestState> {
        self.items.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn open(&mut self, handle: Handle, parent: Option<Handle>, request: RequestMsg, ctx: &RouteContext<'_>, out: &mut Outbox) {
        debug!(%handle, name = ?request.key.name, private = request.private_stream, "Item registered");
        let mut item = ItemRequestState::new(handle, parent, request);
        if let ServiceSelector::List(list) = &item.selector {
            item.app_service_id = ctx.service_lists.get(list).map(|list| list.service_id);
        }
        self.items.insert(handle, item);
        self.route(handle, true, ctx, out);
    }

    /// Changes QoS, priority, streaming and payload of an item in place
    pub fn reissue(&mut self, handle: Handle, request: RequestMsg, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };
        item.request.qos = request.qos;
        item.request.priority = request.priority;
        item.request.streaming = request.streaming;
        item.request.payload = request.payload;

        match item.current.clone() {
            Some(binding) => self.bind(handle, binding.channel, binding.service_id, &binding.service_name, binding.provider_service_id, Some(binding.stream_id), out),
            None if item.home.is_none() => self.route(handle, false, ctx, out),
            None => {}
        }
    }

    /// Application close: best effort wire close, no further delivery
    pub fn close(&mut self, handle: Handle, ctx: &RouteContext<'_>, out: &mut Outbox) -> bool {
        let reachable = self
            .items
            .get(&handle)
            .and_then(|item| item.current.as_ref())
            .is_some_and(|binding| ctx.channel(binding.channel).is_some_and(|channel| channel.state().is_live()));
        self.unbind(handle, reachable, out);
        self.posts.retain(|_, (owner, _, _)| *owner != handle);
        self.items.remove(&handle).is_some()
    }

    /// Item traffic from `channel`; false when the stream is not an item stream
    pub fn on_message(&mut self, channel: ChannelId, msg: Msg, ctx: &RouteContext<'_>, out: &mut Outbox) -> bool {
        let Some(handle) = self.streams.get(&(channel, msg.stream_id())).copied() else {
            return false;
        };

        match msg {
            Msg::Refresh(refresh) => self.on_refresh(handle, refresh, ctx, out),
            Msg::Status(status) => self.on_status(handle, status, ctx, out),
            Msg::Update(mut update) => {
                if let Some(item) = self.items.get(&handle) {
                    update.key = item.app_key(&update.key);
                    update.stream_id = 0;
                    out.deliver(handle, Msg::Update(update));
                }
            }
            Msg::Generic(mut generic) => {
                if let Some(item) = self.items.get(&handle) {
                    generic.key = item.app_key(&generic.key);
                    generic.stream_id = 0;
                    out.deliver(handle, Msg::Generic(generic));
                }
            }
            Msg::Ack(mut ack) => {
                if let Some(item) = self.items.get(&handle) {
                    ack.key = item.app_key(&ack.key);
                    ack.stream_id = 0;
                    out.deliver(handle, Msg::Ack(ack));
                }
            }
            other => debug!(%channel, %handle, kind = other.kind(), "Unexpected message on item stream"),
        }
        true
    }

    fn on_refresh(&mut self, handle: Handle, mut refresh: RefreshMsg, ctx: &RouteContext<'_>, out: &mut Outbox) {
        match refresh.state.stream {
            StreamState::ClosedRecover => {
                self.recover(handle, refresh.state.code, refresh.state.text, false, ctx, out);
                return;
            }
            StreamState::Closed | StreamState::Redirected => {
                self.unbind(handle, false, out);
                self.terminate(handle, refresh.state, out);
                return;
            }
            StreamState::Open | StreamState::NonStreaming => {}
        }

        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };
        item.epoch += 1;
        item.lifecycle = Lifecycle::Open;
        item.tried.clear();
        item.suspect_sent = refresh.state.data == DataState::Suspect;
        if refresh.item_group.is_some() {
            item.item_group = refresh.item_group.clone();
        }

        let finished = refresh.state.stream == StreamState::NonStreaming && refresh.complete;
        refresh.key = item.app_key(&refresh.key);
        refresh.stream_id = 0;
        refresh.private_stream = item.is_private();
        out.deliver(handle, Msg::Refresh(refresh));

        if finished {
            self.unbind(handle, false, out);
            self.items.remove(&handle);
            out.close_handle(handle);
        }
    }

    fn on_status(&mut self, handle: Handle, mut status: StatusMsg, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };
        if status.item_group.is_some() {
            item.item_group = status.item_group.clone();
        }

        let Some(state) = status.state.clone() else {
            status.key = item.app_key(&status.key);
            status.stream_id = 0;
            out.deliver(handle, Msg::Status(status));
            return;
        };

        match state.stream {
            StreamState::Open => {
                if state.data == DataState::Suspect {
                    item.suspect_sent = true;
                }
                status.key = item.app_key(&status.key);
                status.stream_id = 0;
                out.deliver(handle, Msg::Status(status));
            }
            StreamState::ClosedRecover => self.recover(handle, state.code, state.text, false, ctx, out),
            StreamState::Closed | StreamState::Redirected | StreamState::NonStreaming => {
                self.unbind(handle, false, out);
                self.terminate(handle, state, out);
            }
        }
    }

    /// Request timeout: shared items move to the next candidate, private items are re-requested in place
    pub fn on_timeout(&mut self, handle: Handle, epoch: u64, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };
        if item.epoch != epoch || item.lifecycle != Lifecycle::AwaitingRefresh {
            return;
        }
        let Some(binding) = item.current.clone() else {
            return;
        };

        warn!(%handle, channel = %binding.channel, service = %binding.service_name, "Request timed out");
        if !item.is_private() {
            self.recover(handle, StatusCode::Timeout, "Request timeout".to_string(), true, ctx, out);
            self.schedule_retry(handle, out);
            return;
        }

        Self::suspect(item, StatusCode::Timeout, "Request timeout", out);
        self.unbind(handle, true, out);
        self.bind(handle, binding.channel, binding.service_id, &binding.service_name, binding.provider_service_id, None, out);
    }

    /// Re-routes an item that a timeout left without any untried channel
    pub fn on_retry(&mut self, handle: Handle, epoch: u64, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let Some(item) = self.items.get(&handle) else {
            return;
        };
        if item.epoch != epoch || item.current.is_some() || item.home.is_some() {
            return;
        }
        debug!(%handle, "Retrying timed out request");
        self.route(handle, false, ctx, out);
    }

    fn schedule_retry(&mut self, handle: Handle, out: &mut Outbox) {
        let (Some(item), Some(timeout)) = (self.items.get(&handle), self.request_timeout) else {
            return;
        };
        if item.current.is_none() && item.home.is_none() {
            out.schedule(timeout, TimerKind::RetryRequest { handle, epoch: item.epoch });
        }
    }

    /// Items bound to a lost (or parked) channel
    pub fn on_channel_lost(
        &mut self,
        channel: ChannelId,
        reachable: bool,
        classify: impl Fn(bool) -> ItemRecovery,
        ctx: &RouteContext<'_>,
        out: &mut Outbox,
    ) {
        for handle in self.handles_where(|item| item.is_bound_to(channel)) {
            let Some(private) = self.items.get(&handle).map(ItemRequestState::is_private) else {
                continue;
            };
            self.unbind(handle, reachable, out);

            match classify(private) {
                ItemRecovery::Reroute => {
                    if let Some(item) = self.items.get_mut(&handle) {
                        item.tried.clear();
                        item.lifecycle = Lifecycle::Recovering;
                        Self::suspect(item, StatusCode::ChannelDown, "Channel is down", out);
                    }
                    self.route(handle, false, ctx, out);
                }
                ItemRecovery::RecoverInPlace => {
                    if let Some(item) = self.items.get_mut(&handle) {
                        item.home = Some(channel);
                        item.lifecycle = Lifecycle::Recovering;
                        Self::suspect(item, StatusCode::ChannelDown, "Channel is down, recovering", out);
                    }
                }
                ItemRecovery::Close => {
                    self.terminate(handle, OmmState::closed_recover_suspect(StatusCode::ChannelDown, "Channel is down"), out);
                }
            }
        }
    }

    /// The channel will not come back: private streams waiting on it are closed
    pub fn on_channel_given_up(&mut self, channel: ChannelId, out: &mut Outbox) {
        for handle in self.handles_where(|item| item.home == Some(channel)) {
            self.terminate(handle, OmmState::closed_recover_suspect(StatusCode::ChannelDown, "Channel is closed"), out);
        }
    }

    /// Channel (re)gained Active: recover private streams homed there, then retry everything pending
    pub fn on_channel_active(&mut self, channel: ChannelId, ctx: &RouteContext<'_>, out: &mut Outbox) {
        for handle in self.handles_where(|item| item.home == Some(channel)) {
            let target = self.items.get(&handle).and_then(|item| {
                let service = Self::selected_service(item, ctx, |service| service.has_source(channel))?;
                ctx.qualifies(channel, service, item).then_some(service)
            });
            match target {
                Some(service) => {
                    let Some(provider_id) = service.provider_service_id(channel) else {
                        continue;
                    };
                    info!(%handle, %channel, "Recovering private stream in place");
                    self.bind(handle, channel, service.service_id, &service.name, provider_id, None, out);
                }
                None => debug!(%handle, %channel, "Private stream still waiting for its service"),
            }
        }
        self.retry_pending(ctx, out);
    }

    /// Items of `service_id` on `channel` lost their service there
    pub fn on_service_unavailable(&mut self, service_id: u16, channel: ChannelId, send_close: bool, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let handles = self.handles_where(|item| item.current.as_ref().is_some_and(|binding| binding.channel == channel && binding.service_id == service_id));
        for handle in handles {
            self.recover(handle, StatusCode::ServiceDown, "Service is down".to_string(), send_close, ctx, out);
        }
    }

    /// Item group status from a directory update
    pub fn on_group_status(&mut self, service_id: u16, channel: ChannelId, group: &GroupStatus, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let handles = self.handles_where(|item| {
            item.item_group.as_ref() == Some(&group.group_id)
                && item.current.as_ref().is_some_and(|binding| binding.channel == channel && binding.service_id == service_id)
        });

        for handle in handles {
            if let Some(merged) = &group.merged_to {
                if let Some(item) = self.items.get_mut(&handle) {
                    item.item_group = Some(merged.clone());
                }
            }

            let Some(state) = &group.state else {
                continue;
            };
            match state.stream {
                StreamState::ClosedRecover => self.recover(handle, state.code, state.text.clone(), false, ctx, out),
                StreamState::Closed | StreamState::Redirected | StreamState::NonStreaming => {
                    self.unbind(handle, false, out);
                    self.terminate(handle, state.clone(), out);
                }
                StreamState::Open => {
                    if let Some(item) = self.items.get_mut(&handle) {
                        if state.data == DataState::Suspect {
                            item.suspect_sent = true;
                        }
                        out.deliver(handle, Self::status_for(item, state.clone()));
                    }
                }
            }
        }
    }

    /// A warm standby member was promoted: re-sync open shared items of the group through it
    pub fn resync_group(&mut self, members: &[ChannelId], promoted: ChannelId, service: Option<&str>, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let handles = self.handles_where(|item| {
            !item.is_private()
                && matches!(item.lifecycle, Lifecycle::Open | Lifecycle::AwaitingRefresh)
                && item.current.as_ref().is_some_and(|binding| {
                    members.contains(&binding.channel) && service.is_none_or(|name| name == binding.service_name)
                })
        });

        for handle in handles {
            let Some(binding) = self.items.get(&handle).and_then(|item| item.current.clone()) else {
                continue;
            };

            if binding.channel == promoted {
                self.bind(handle, promoted, binding.service_id, &binding.service_name, binding.provider_service_id, Some(binding.stream_id), out);
                continue;
            }

            let target = ctx.directory.service_by_id(binding.service_id).and_then(|service| {
                let item = self.items.get(&handle)?;
                let provider_id = service.provider_service_id(promoted)?;
                ctx.qualifies(promoted, service, item).then_some(provider_id)
            });
            let Some(provider_id) = target else {
                debug!(%handle, %promoted, "Promoted member cannot serve item yet");
                continue;
            };

            let reachable = ctx.channel(binding.channel).is_some_and(|channel| channel.state().is_live());
            self.unbind(handle, reachable, out);
            self.bind(handle, promoted, binding.service_id, &binding.service_name, provider_id, None, out);
        }

        self.retry_pending(ctx, out);
    }

    /// Routes every item that is neither bound nor waiting for its home channel
    pub fn retry_pending(&mut self, ctx: &RouteContext<'_>, out: &mut Outbox) {
        for handle in self.handles_where(|item| item.current.is_none() && item.home.is_none() && item.lifecycle != Lifecycle::Closed) {
            self.route(handle, false, ctx, out);
        }
    }

    /// On-stream post, pinned to the item's channel
    pub fn submit_post(&mut self, handle: Handle, mut post: PostMsg, out: &mut Outbox) -> bool {
        let Some(item) = self.items.get(&handle) else {
            return false;
        };
        let Some(binding) = &item.current else {
            warn!(%handle, "Post dropped, item is not open on any channel");
            return false;
        };

        post.stream_id = binding.stream_id;
        post.domain = item.domain();
        post.key.service_id = Some(binding.provider_service_id);
        post.key.service_name = None;
        if post.key.name.is_none() {
            post.key.name = item.request.key.name.clone();
        }
        out.send(binding.channel, Msg::Post(post));
        true
    }

    /// Generic message on the item's stream
    pub fn submit_generic(&mut self, handle: Handle, mut generic: GenericMsg, out: &mut Outbox) -> bool {
        let Some(item) = self.items.get(&handle) else {
            return false;
        };
        let Some(binding) = &item.current else {
            warn!(%handle, "Generic message dropped, item is not open on any channel");
            return false;
        };

        generic.stream_id = binding.stream_id;
        match generic.key.service_id {
            None => generic.key.service_id = Some(binding.provider_service_id),
            Some(id) if id == binding.service_id => generic.key.service_id = Some(binding.provider_service_id),
            Some(_) => {}
        }
        out.send(binding.channel, Msg::Generic(generic));
        true
    }

    /// Off-stream post: sent on the login stream of every active channel carrying the service
    pub fn post_off_stream(&mut self, handle: Handle, post: PostMsg, service_id: u16, ctx: &RouteContext<'_>, out: &mut Outbox) -> usize {
        let Some(service) = ctx.directory.service_by_id(service_id) else {
            warn!(%handle, service_id, "Off-stream post dropped, service is gone");
            return 0;
        };

        let mut sent = 0;
        for channel in service.channels() {
            if !ctx.is_usable(channel) {
                continue;
            }
            let Some(provider_id) = service.provider_service_id(channel) else {
                continue;
            };

            let mut msg = post.clone();
            msg.stream_id = streams::LOGIN;
            msg.key.service_id = Some(provider_id);
            msg.key.service_name = None;
            if post.solicit_ack {
                self.posts.insert((channel, post.post_id), (handle, service.service_id, service.name.clone()));
            }
            out.send(channel, Msg::Post(msg));
            sent += 1;
        }

        debug!(%handle, service = %service.name, post_id = post.post_id, channels = sent, "Off-stream post fanned out");
        sent
    }

    /// Ack on a login stream for an off-stream post
    pub fn on_login_ack(&mut self, channel: ChannelId, mut ack: AckMsg) -> Option<(Handle, Msg)> {
        let (handle, service_id, service_name) = self.posts.remove(&(channel, ack.ack_id))?;
        ack.stream_id = 0;
        ack.key.service_id = Some(service_id);
        ack.key.service_name = Some(service_name);
        Some((handle, Msg::Ack(ack)))
    }

    fn route(&mut self, handle: Handle, initial: bool, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };

        match Self::resolve(item, initial, ctx) {
            Resolution::Route { service, channel } => {
                let Some(provider_id) = service.provider_service_id(channel) else {
                    return;
                };
                self.bind(handle, channel, service.service_id, &service.name, provider_id, None, out);
            }
            Resolution::Pending { code, text } if !item.is_private() => {
                item.tried.clear();
                debug!(%handle, %text, "Item pending");
                Self::suspect(item, code, &text, out);
            }
            Resolution::Pending { code, text } | Resolution::Terminal { code, text } => {
                self.terminate(handle, OmmState::closed_suspect(code, text), out);
            }
        }
    }

    fn resolve<'a>(item: &ItemRequestState, initial: bool, ctx: &RouteContext<'a>) -> Resolution<'a> {
        let service = match &item.selector {
            ServiceSelector::Name(name) => match ctx.directory.service_by_name(name) {
                Some(service) => service,
                None => return Resolution::Pending { code: StatusCode::SourceUnknown, text: format!("Service name of '{name}' is not found") },
            },
            ServiceSelector::Id(id) => match ctx.directory.service_by_id(*id) {
                Some(service) => service,
                None if initial => return Resolution::Terminal { code: StatusCode::SourceUnknown, text: format!("Service id of '{id}' is not found") },
                None => return Resolution::Pending { code: StatusCode::SourceUnknown, text: format!("Service id of '{id}' is not found") },
            },
            ServiceSelector::List(list) => {
                if ctx.service_lists.get(list).is_none() {
                    return Resolution::Terminal { code: StatusCode::SourceUnknown, text: format!("Service list of '{list}' is not found") };
                }
                match Self::selected_service(item, ctx, |service| ctx.first_candidate(service, item).is_some()) {
                    Some(service) => service,
                    None => return Resolution::Pending { code: StatusCode::ServiceDown, text: format!("No service of list '{list}' is available") },
                }
            }
            ServiceSelector::Unspecified => {
                return Resolution::Terminal { code: StatusCode::InvalidArgument, text: "Request does not name a service".to_string() };
            }
        };

        match ctx.first_candidate(service, item) {
            Some(channel) => Resolution::Route { service, channel },
            None => {
                let (code, text) = Self::unavailable_reason(item, service);
                Resolution::Pending { code, text }
            }
        }
    }

    /// The aggregated service the selector names; a list picks its first member accepted by `accept`
    fn selected_service<'a>(item: &ItemRequestState, ctx: &RouteContext<'a>, accept: impl Fn(&AggregatedService) -> bool) -> Option<&'a AggregatedService> {
        match &item.selector {
            ServiceSelector::Name(name) => ctx.directory.service_by_name(name),
            ServiceSelector::Id(id) => ctx.directory.service_by_id(*id),
            ServiceSelector::List(list) => {
                let list = ctx.service_lists.get(list)?;
                let member = list.resolve(|name| ctx.directory.service_by_name(name).is_some_and(&accept))?;
                ctx.directory.service_by_name(member)
            }
            ServiceSelector::Unspecified => None,
        }
    }

    fn unavailable_reason(item: &ItemRequestState, service: &AggregatedService) -> (StatusCode, String) {
        if !service.is_up() {
            return (StatusCode::ServiceDown, format!("Service '{}' is down", service.name));
        }
        if !service.status().accepting_requests {
            return (StatusCode::ServiceDown, format!("Service '{}' is not accepting requests", service.name));
        }
        if !service.info.supports(item.domain()) {
            return (StatusCode::DomainNotSupported, format!("Service '{}' does not support domain {}", service.name, item.domain()));
        }
        let qos = item.requested_qos();
        if !qos.is_satisfied_by(&service.info.qos, service.info.supports_qos_range) {
            return (StatusCode::QosNotSupported, format!("Service '{}' does not provide QoS {qos}", service.name));
        }
        (StatusCode::None, format!("No channel of service '{}' is available", service.name))
    }

    #[allow(clippy::too_many_arguments)]
    fn bind(
        &mut self,
        handle: Handle,
        channel: ChannelId,
        service_id: u16,
        service_name: &str,
        provider_service_id: u16,
        reuse: Option<StreamId>,
        out: &mut Outbox,
    ) {
        let stream_id = match reuse {
            Some(stream_id) => stream_id,
            None => self.allocate_stream(channel),
        };
        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };

        let binding = Binding { channel, stream_id, service_id, service_name: service_name.to_string(), provider_service_id };
        out.send(channel, Msg::Request(item.wire_request(&binding)));
        debug!(%handle, %channel, stream_id, service = service_name, "Item request sent");

        item.learn_service(service_id, service_name);
        item.current = Some(binding);
        item.home = None;
        item.lifecycle = Lifecycle::AwaitingRefresh;
        item.epoch += 1;
        if let Some(timeout) = self.request_timeout {
            out.schedule(timeout, TimerKind::RequestTimeout { handle, epoch: item.epoch });
        }
        self.streams.insert((channel, stream_id), handle);
    }

    fn unbind(&mut self, handle: Handle, send_close: bool, out: &mut Outbox) -> Option<Binding> {
        let item = self.items.get_mut(&handle)?;
        let binding = item.current.take()?;
        item.epoch += 1;
        self.streams.remove(&(binding.channel, binding.stream_id));
        if send_close {
            out.send(binding.channel, Msg::Close(CloseMsg { stream_id: binding.stream_id, domain: item.domain() }));
        }
        Some(binding)
    }

    /// Moves a shared item off its channel; a private item is closed instead
    fn recover(&mut self, handle: Handle, code: StatusCode, text: String, send_close: bool, ctx: &RouteContext<'_>, out: &mut Outbox) {
        let binding = self.unbind(handle, send_close, out);
        let Some(item) = self.items.get_mut(&handle) else {
            return;
        };

        if item.is_private() {
            self.terminate(handle, OmmState::closed_recover_suspect(code, text), out);
            return;
        }

        if let Some(binding) = binding {
            item.tried.insert(binding.channel);
        }
        item.lifecycle = Lifecycle::Recovering;
        Self::suspect(item, code, &text, out);
        self.route(handle, false, ctx, out);
    }

    /// Delivers `state` and forgets the item
    fn terminate(&mut self, handle: Handle, state: OmmState, out: &mut Outbox) {
        let Some(mut item) = self.items.remove(&handle) else {
            return;
        };
        if let Some(binding) = item.current.take() {
            self.streams.remove(&(binding.channel, binding.stream_id));
        }
        item.lifecycle = Lifecycle::Closed;
        info!(%handle, state = %state, "Item closed");
        out.deliver(handle, Self::status_for(&item, state));
        out.close_handle(handle);
    }

    /// One Open/Suspect per outage, cleared by the next refresh
    fn suspect(item: &mut ItemRequestState, code: StatusCode, text: &str, out: &mut Outbox) {
        if item.suspect_sent {
            return;
        }
        item.suspect_sent = true;
        out.deliver(item.handle, Self::status_for(item, OmmState::open_suspect(code, text)));
    }

    fn status_for(item: &ItemRequestState, state: OmmState) -> Msg {
        let mut status = StatusMsg::new(0, item.domain(), item.app_key(&MsgKey::default()), state);
        status.private_stream = item.is_private();
        status.item_group = item.item_group.clone();
        Msg::Status(status)
    }

    fn allocate_stream(&mut self, channel: ChannelId) -> StreamId {
        let next = self.next_stream.entry(channel).or_insert(streams::FIRST_ITEM);
        let stream_id = *next;
        *next += 1;
        stream_id
    }

    /// Matching handles in ascending order, so recovery is deterministic
    fn handles_where(&self, predicate: impl Fn(&ItemRequestState) -> bool) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.items.values().filter(|item| predicate(item)).map(|item| item.handle).collect();
        handles.sort();
        handles
    }
}
