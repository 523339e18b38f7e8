#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use omm_session::Clock;
use omm_session::ConsumerClient;
use omm_session::ConsumerEvent;
use omm_session::DispatchMode;
use omm_session::ManualClock;
use omm_session::OmmConsumer;
use omm_session::SessionConfig;
use omm_sim::SimNetwork;
use omm_types::AckMsg;
use omm_types::ChannelConfig;
use omm_types::DirectoryMsg;
use omm_types::GenericMsg;
use omm_types::Handle;
use omm_types::Msg;
use omm_types::OmmState;
use omm_types::RefreshMsg;
use omm_types::RequestMsg;
use omm_types::ServiceEntry;
use omm_types::ServiceInfo;
use omm_types::StatusMsg;
use omm_types::UpdateMsg;
use parking_lot::Mutex;

/// Every callback the session made, in delivery order
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Vec<(ConsumerEvent, Msg)>>>,
}

impl Recorder {
    pub fn all(&self) -> Vec<(ConsumerEvent, Msg)> {
        self.inner.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.inner.lock().iter().map(|(_, msg)| msg.kind()).collect()
    }

    pub fn refreshes(&self) -> Vec<RefreshMsg> {
        self.inner.lock().iter().filter_map(|(_, msg)| if let Msg::Refresh(refresh) = msg { Some(refresh.clone()) } else { None }).collect()
    }

    pub fn updates(&self) -> Vec<UpdateMsg> {
        self.inner.lock().iter().filter_map(|(_, msg)| if let Msg::Update(update) = msg { Some(update.clone()) } else { None }).collect()
    }

    pub fn statuses(&self) -> Vec<StatusMsg> {
        self.inner.lock().iter().filter_map(|(_, msg)| if let Msg::Status(status) = msg { Some(status.clone()) } else { None }).collect()
    }

    pub fn states(&self) -> Vec<OmmState> {
        self.statuses().into_iter().filter_map(|status| status.state).collect()
    }

    pub fn acks(&self) -> Vec<AckMsg> {
        self.inner.lock().iter().filter_map(|(_, msg)| if let Msg::Ack(ack) = msg { Some(ack.clone()) } else { None }).collect()
    }

    pub fn directories(&self) -> Vec<DirectoryMsg> {
        self.inner.lock().iter().filter_map(|(_, msg)| if let Msg::Directory(directory) = msg { Some(directory.clone()) } else { None }).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    fn record(&self, event: &ConsumerEvent, msg: Msg) {
        self.inner.lock().push((*event, msg));
    }
}

impl ConsumerClient for Recorder {
    fn on_refresh(&mut self, msg: &RefreshMsg, event: &ConsumerEvent) {
        self.record(event, Msg::Refresh(msg.clone()));
    }

    fn on_update(&mut self, msg: &UpdateMsg, event: &ConsumerEvent) {
        self.record(event, Msg::Update(msg.clone()));
    }

    fn on_status(&mut self, msg: &StatusMsg, event: &ConsumerEvent) {
        self.record(event, Msg::Status(msg.clone()));
    }

    fn on_ack(&mut self, msg: &AckMsg, event: &ConsumerEvent) {
        self.record(event, Msg::Ack(msg.clone()));
    }

    fn on_generic(&mut self, msg: &GenericMsg, event: &ConsumerEvent) {
        self.record(event, Msg::Generic(msg.clone()));
    }

    fn on_directory(&mut self, msg: &DirectoryMsg, event: &ConsumerEvent) {
        self.record(event, Msg::Directory(msg.clone()));
    }
}

/// Consumer in user dispatch mode over a simulated network, with a hand-driven clock
#[derive(Debug)]
pub struct Harness {
    pub net: SimNetwork,
    pub clock: Arc<ManualClock>,
    pub consumer: OmmConsumer,
}

impl Harness {
    pub fn new(net: SimNetwork, config: SessionConfig) -> Self {
        Self::try_new(net, config).expect("session should start")
    }

    pub fn try_new(net: SimNetwork, config: SessionConfig) -> omm_session::Result<Self> {
        let clock = Arc::new(ManualClock::new());
        let session_clock: Arc<dyn Clock> = clock.clone();
        let consumer = OmmConsumer::with_clock(config, net.transport(), session_clock)?;
        Ok(Self { net, clock, consumer })
    }

    pub fn pump(&self) {
        self.consumer.dispatch(Duration::ZERO).expect("dispatch should run");
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.pump();
    }

    pub fn open(&self, request: RequestMsg) -> (Handle, Recorder) {
        let recorder = Recorder::default();
        let handle = self.consumer.register_client(request, recorder.clone()).expect("register should succeed");
        self.pump();
        (handle, recorder)
    }
}

pub fn config(channels: &[&str]) -> SessionConfig {
    channels
        .iter()
        .enumerate()
        .fold(SessionConfig::new("Consumer_1").with_dispatch(DispatchMode::User), |config, (index, name)| {
            config.with_channel(ChannelConfig::new(*name, "localhost", 14002 + index as u16))
        })
}

pub fn service(service_id: u16, name: &str) -> ServiceEntry {
    ServiceEntry::new(service_id, ServiceInfo::new(name))
}

pub fn direct_feed(service_id: u16) -> ServiceEntry {
    service(service_id, "DIRECT_FEED")
}

pub fn ibm() -> RequestMsg {
    RequestMsg::market_price("IBM.N").service_name("DIRECT_FEED")
}

/// Two providers both carrying DIRECT_FEED under different provider ids
pub fn two_feeds() -> SimNetwork {
    let net = SimNetwork::new();
    net.add_provider("A", vec![direct_feed(10)]);
    net.add_provider("B", vec![direct_feed(20)]);
    net
}
