use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use omm_app::cli;
use omm_app::config_loader;
use omm_app::config_loader::ConsumerConfigFile;
use omm_app::shutdown_handler;
use omm_app::tracing_setup;
use omm_session::ConsumerClient;
use omm_session::ConsumerEvent;
use omm_session::DispatchMode;
use omm_session::OmmConsumer;
use omm_sim::SimNetwork;
use omm_types::AckMsg;
use omm_types::DomainType;
use omm_types::GenericMsg;
use omm_types::RefreshMsg;
use omm_types::RequestMsg;
use omm_types::ServiceEntry;
use omm_types::ServiceInfo;
use omm_types::StatusMsg;
use omm_types::UpdateMsg;
use tracing::debug;
use tracing::info;
use tracing::warn;

const DEFAULT_CONFIG: &str = "config/consumer.toml";
const POLL: Duration = Duration::from_millis(50);
const FIRST_PROVIDER_SERVICE_ID: u16 = 100;
const TICKS: [&[u8]; 4] = [b"BID=101.25 ASK=101.27", b"BID=101.26 ASK=101.28", b"BID=101.24 ASK=101.27", b"BID=101.25 ASK=101.26"];

/// Logs every callback of one stream and counts the traffic
#[derive(Debug)]
struct LoggingClient {
    label: String,
    updates: u64,
}

impl LoggingClient {
    fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), updates: 0 }
    }
}

impl ConsumerClient for LoggingClient {
    fn on_refresh(&mut self, msg: &RefreshMsg, event: &ConsumerEvent) {
        info!(stream = %self.label, handle = %event.handle, service = ?msg.key.service_name, state = %msg.state, "Refresh");
    }

    fn on_update(&mut self, msg: &UpdateMsg, event: &ConsumerEvent) {
        self.updates += 1;
        debug!(stream = %self.label, handle = %event.handle, updates = self.updates, payload = %String::from_utf8_lossy(&msg.payload), "Update");
    }

    fn on_status(&mut self, msg: &StatusMsg, event: &ConsumerEvent) {
        match &msg.state {
            Some(state) => warn!(stream = %self.label, handle = %event.handle, state = %state, "Status"),
            None => debug!(stream = %self.label, handle = %event.handle, "Status without state"),
        }
    }

    fn on_ack(&mut self, msg: &AckMsg, event: &ConsumerEvent) {
        info!(stream = %self.label, handle = %event.handle, ack_id = msg.ack_id, nack = msg.is_nack(), "Ack");
    }

    fn on_generic(&mut self, msg: &GenericMsg, event: &ConsumerEvent) {
        debug!(stream = %self.label, handle = %event.handle, name = ?msg.key.name, "Generic");
    }
}

/// One simulated provider per configured channel, all offering the demo service
fn simulated_network(config: &ConsumerConfigFile) -> SimNetwork {
    let net = SimNetwork::new();
    for (index, channel) in config.session.channels.iter().enumerate() {
        let entry = ServiceEntry::new(FIRST_PROVIDER_SERVICE_ID + index as u16, ServiceInfo::new(config.demo.service.clone()));
        net.add_provider(&channel.name, vec![entry]);
    }
    net
}

/// Publishes one tick on the latest stream of every item each provider was asked for
fn publish_ticks(net: &SimNetwork, providers: &[String], tick: usize) {
    for provider in providers {
        let mut latest = BTreeMap::new();
        for request in net.item_requests(provider) {
            latest.insert(request.key.name.clone(), request.stream_id);
        }
        for stream_id in latest.into_values() {
            net.publish_update(provider, stream_id, TICKS[tick % TICKS.len()]);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = cli::get_config_path(DEFAULT_CONFIG);
    let logging = config_loader::load_consumer_config(&path).map(|file| file.logging).unwrap_or_default();
    let _guard = tracing_setup::init("omm_consumer", &logging.dir, logging.level(), logging.stdout);

    let config_file = config_loader::load_consumer_config_or_default(&path);
    let items = cli::get_items(&config_file.demo.items);
    let demo = config_file.demo.clone();
    let providers: Vec<String> = config_file.session.channels.iter().map(|channel| channel.name.clone()).collect();
    let session_name = config_file.session.name.clone();
    let mode = config_file.session.dispatch;

    let net = simulated_network(&config_file);
    info!(session = %session_name, channels = providers.len(), items = items.len(), ?mode, "Starting consumer");
    let consumer = OmmConsumer::new(config_file.session, net.transport())?;

    let running = Arc::new(AtomicBool::new(true));
    shutdown_handler::setup(&session_name, Arc::clone(&running))?;

    let login = consumer.register_client(RequestMsg::new(DomainType::Login), LoggingClient::new("login"))?;
    for item in &items {
        consumer.register_client(RequestMsg::market_price(item.clone()).service_name(demo.service.clone()), LoggingClient::new(item.clone()))?;
    }

    let started = Instant::now();
    let deadline = demo.run_secs.map(|secs| started + Duration::from_secs(secs));
    let update_interval = Duration::from_millis(demo.update_interval_ms.max(1));
    let mut next_tick = started + update_interval;
    let mut ticks = 0usize;
    let mut disconnected = false;

    while running.load(Ordering::Acquire) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("Run time elapsed");
            break;
        }

        match mode {
            DispatchMode::User => {
                consumer.dispatch(POLL)?;
            }
            DispatchMode::Api => {
                shutdown_handler::wait(&running, Some(Instant::now() + POLL), POLL / 5);
            }
        }

        if !disconnected && demo.disconnect_after_secs.is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs)) {
            disconnected = true;
            if let Some(first) = providers.first() {
                warn!(provider = %first, "Dropping provider connection");
                net.disconnect(first);
            }
        }

        if Instant::now() >= next_tick {
            publish_ticks(&net, &providers, ticks);
            ticks += 1;
            next_tick += update_interval;
        }
    }

    info!(channels = %serde_json::to_string(&consumer.session_information())?, ticks, "Session information");
    consumer.unregister(login)?;
    drop(consumer);
    info!(session = %session_name, "Consumer stopped");
    Ok(())
}
