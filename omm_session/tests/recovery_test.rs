//! Channel loss, service loss, request timeouts and reconnection

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::config;
use common::direct_feed;
use common::ibm;
use common::two_feeds;
use common::Harness;
use omm_session::ChannelState;
use omm_session::SessionError;
use omm_sim::ProviderConfig;
use omm_sim::SimNetwork;
use omm_types::DataState;
use omm_types::DomainType;
use omm_types::GroupStatus;
use omm_types::Msg;
use omm_types::MsgKey;
use omm_types::OmmState;
use omm_types::RefreshMsg;
use omm_types::RequestMsg;
use omm_types::ServiceStatus;
use omm_types::ServiceUpdate;
use omm_types::StatusCode;
use omm_types::StreamState;

fn channel_state(h: &Harness, name: &str) -> ChannelState {
    h.consumer.session_information().into_iter().find(|info| info.name == name).map(|info| info.state).expect("configured channel")
}

#[test]
fn test_channel_loss_moves_item_to_next_channel() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());
    assert_eq!(h.net.item_requests("A").len(), 1);

    h.net.disconnect("A");
    h.pump();

    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream, StreamState::Open);
    assert_eq!(states[0].data, DataState::Suspect);
    assert_eq!(states[0].code, StatusCode::ChannelDown);

    let requests = h.net.item_requests("B");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key.service_id, Some(20));
    assert_eq!(recorder.kinds(), vec!["RefreshMsg", "StatusMsg", "RefreshMsg"]);
    assert_eq!(channel_state(&h, "A"), ChannelState::Reconnecting);

    // A comes back but the item stays where it is
    h.advance(Duration::from_millis(1000));
    assert_eq!(channel_state(&h, "A"), ChannelState::Active);
    assert_eq!(h.net.connect_count("A"), 2);
    assert_eq!(h.net.item_requests("A").len(), 1);
    assert_eq!(recorder.len(), 3);
}

#[test]
fn test_service_down_closes_and_reroutes() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());
    let stream_id = h.net.item_requests("A")[0].stream_id;

    h.net.update_directory("A", vec![ServiceUpdate::status(10, ServiceStatus::down())]);
    h.pump();

    assert_eq!(h.net.closes("A"), vec![stream_id]);
    assert_eq!(h.net.item_requests("B").len(), 1);
    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].code, StatusCode::ServiceDown);
    assert_eq!(recorder.refreshes().len(), 2);
}

#[test]
fn test_not_accepting_requests_reroutes() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());

    h.net.update_directory("A", vec![ServiceUpdate::status(10, ServiceStatus::not_accepting())]);
    h.pump();

    assert_eq!(h.net.item_requests("B").len(), 1);
    assert_eq!(recorder.refreshes().len(), 2);
}

#[test]
fn test_last_source_down_leaves_item_pending() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());

    h.net.update_directory("A", vec![ServiceUpdate::status(10, ServiceStatus::down())]);
    h.net.update_directory("B", vec![ServiceUpdate::status(20, ServiceStatus::down())]);
    h.pump();
    assert_eq!(recorder.states().len(), 1);
    let after_down = h.net.item_requests("B").len();

    h.net.update_directory("A", vec![ServiceUpdate::status(10, ServiceStatus::up())]);
    h.pump();

    assert_eq!(h.net.item_requests("A").len(), 2);
    assert_eq!(h.net.item_requests("B").len(), after_down);
    assert_eq!(recorder.refreshes().last().map(|refresh| refresh.state.is_open_ok()), Some(true));
}

#[test]
fn test_request_timeout_moves_to_next_candidate() {
    let net = SimNetwork::new();
    net.add_provider_with("A", ProviderConfig { auto_refresh: false, ..Default::default() }, vec![direct_feed(10)]);
    net.add_provider("B", vec![direct_feed(20)]);
    let h = Harness::new(net, config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());
    let stream_id = h.net.item_requests("A")[0].stream_id;
    assert_eq!(recorder.len(), 0);

    h.advance(Duration::from_millis(14_999));
    assert_eq!(recorder.len(), 0);

    h.advance(Duration::from_millis(1));
    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].code, StatusCode::Timeout);
    assert_eq!(h.net.closes("A"), vec![stream_id]);
    assert_eq!(h.net.item_requests("B").len(), 1);
    assert_eq!(recorder.refreshes().len(), 1);
}

#[test]
fn test_request_timeout_on_only_candidate_retries() {
    let net = SimNetwork::new();
    net.add_provider_with("A", ProviderConfig { auto_refresh: false, ..Default::default() }, vec![direct_feed(10)]);
    let h = Harness::new(net, config(&["A"]));
    let (_, recorder) = h.open(ibm());
    let first = h.net.item_requests("A")[0].stream_id;

    h.advance(Duration::from_secs(15));
    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream, StreamState::Open);
    assert_eq!(states[0].data, DataState::Suspect);
    assert_eq!(states[0].code, StatusCode::Timeout);
    assert_eq!(h.net.closes("A"), vec![first]);
    assert_eq!(h.net.item_requests("A").len(), 1);

    h.advance(Duration::from_secs(15));
    let requests = h.net.item_requests("A");
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[1].stream_id, first);
    assert_eq!(recorder.states().len(), 1);

    let stream_id = requests[1].stream_id;
    let refresh = RefreshMsg::new(stream_id, DomainType::MarketPrice, MsgKey::named("IBM.N"), OmmState::open_ok("Refresh completed"));
    h.net.send_to_consumer("A", Msg::Refresh(refresh));
    h.pump();
    assert_eq!(recorder.refreshes().len(), 1);

    h.advance(Duration::from_secs(60));
    assert_eq!(h.net.item_requests("A").len(), 2);
}

#[test]
fn test_refresh_disarms_timeout() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());

    h.advance(Duration::from_secs(60));

    assert_eq!(recorder.len(), 1);
    assert!(h.net.closes("A").is_empty());
    assert!(h.net.item_requests("B").is_empty());
}

#[test]
fn test_reconnect_backoff_doubles_up_to_cap() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    assert_eq!(h.net.connect_count("A"), 1);

    h.net.configure("A", |provider| provider.reachable = false);
    h.net.disconnect("A");
    h.pump();

    for (wait_ms, expected) in [(999, 1), (1, 2), (1999, 2), (1, 3), (3999, 3), (1, 4), (4999, 4), (1, 5), (5000, 6)] {
        h.advance(Duration::from_millis(wait_ms));
        assert_eq!(h.net.connect_count("A"), expected, "after waiting {wait_ms}ms");
    }

    h.net.configure("A", |provider| provider.reachable = true);
    h.advance(Duration::from_millis(5000));
    assert_eq!(h.net.connect_count("A"), 7);
    assert!(h.net.is_connected("A"));
    assert_eq!(channel_state(&h, "A"), ChannelState::Active);
}

#[test]
fn test_private_stream_recovers_on_same_channel() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm().private_stream(true));
    assert!(recorder.refreshes()[0].private_stream);

    h.net.disconnect("A");
    h.pump();

    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream, StreamState::Open);
    assert_eq!(states[0].code, StatusCode::ChannelDown);
    assert!(h.net.item_requests("B").is_empty());

    h.advance(Duration::from_millis(1000));

    assert_eq!(h.net.item_requests("A").len(), 2);
    assert!(h.net.item_requests("B").is_empty());
    let refreshes = recorder.refreshes();
    assert_eq!(refreshes.len(), 2);
    assert!(refreshes[1].private_stream);
}

#[test]
fn test_private_stream_closed_without_reconnect() {
    let mut cfg = config(&["A", "B"]);
    cfg.reconnect.attempt_limit = 0;
    let h = Harness::new(two_feeds(), cfg);
    let (handle, recorder) = h.open(ibm().private_stream(true));

    h.net.disconnect("A");
    h.pump();

    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream, StreamState::ClosedRecover);
    assert_eq!(states[0].code, StatusCode::ChannelDown);
    assert!(h.net.item_requests("B").is_empty());
    assert_eq!(channel_state(&h, "A"), ChannelState::Closed);
    assert_eq!(h.consumer.unregister(handle), Err(SessionError::UnknownHandle(handle)));
}

#[test]
fn test_provider_closed_recover_moves_item() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());
    let stream_id = h.net.item_requests("A")[0].stream_id;

    h.net.publish_status("A", stream_id, OmmState::closed_recover_suspect(StatusCode::None, "Item unavailable here"));
    h.pump();

    assert_eq!(h.net.item_requests("B").len(), 1);
    assert_eq!(recorder.states().len(), 1);
    assert_eq!(recorder.refreshes().len(), 2);
}

#[test]
fn test_provider_closed_is_terminal() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (handle, recorder) = h.open(ibm());
    let stream_id = h.net.item_requests("A")[0].stream_id;

    h.net.publish_status("A", stream_id, OmmState::closed_suspect(StatusCode::NotFound, "No such item"));
    h.pump();

    let states = recorder.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream, StreamState::Closed);
    assert_eq!(states[0].code, StatusCode::NotFound);
    assert!(h.net.item_requests("B").is_empty());
    assert_eq!(h.consumer.unregister(handle), Err(SessionError::UnknownHandle(handle)));
}

#[test]
fn test_item_group_status() {
    let group = Bytes::from_static(b"G1");
    let net = SimNetwork::new();
    let mut entry = direct_feed(10);
    entry.group_id = Some(group.clone());
    net.add_provider("A", vec![entry]);
    net.add_provider("B", vec![direct_feed(20)]);
    let h = Harness::new(net, config(&["A", "B"]));
    let (_, recorder) = h.open(ibm());
    assert_eq!(recorder.refreshes()[0].item_group, Some(group.clone()));

    let suspect = GroupStatus { group_id: group.clone(), state: Some(OmmState::open_suspect(StatusCode::None, "Group stale")), merged_to: None };
    h.net.update_directory("A", vec![ServiceUpdate::group(10, suspect)]);
    h.pump();
    assert_eq!(recorder.states().len(), 1);
    assert!(h.net.item_requests("B").is_empty());

    let closed = GroupStatus { group_id: group, state: Some(OmmState::closed_recover_suspect(StatusCode::None, "Group down")), merged_to: None };
    h.net.update_directory("A", vec![ServiceUpdate::group(10, closed)]);
    h.pump();
    assert_eq!(h.net.item_requests("B").len(), 1);
    assert_eq!(recorder.refreshes().len(), 2);
}

#[test]
fn test_login_stream_tracks_channels() {
    let h = Harness::new(two_feeds(), config(&["A", "B"]));
    let (_, login) = h.open(RequestMsg::new(DomainType::Login));
    assert_eq!(login.kinds(), vec!["RefreshMsg"]);

    h.net.disconnect("A");
    h.pump();
    assert_eq!(login.len(), 1);

    h.net.disconnect("B");
    h.pump();
    let states = login.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].stream, StreamState::Open);
    assert_eq!(states[0].code, StatusCode::ChannelDown);

    h.advance(Duration::from_millis(1000));
    assert_eq!(login.kinds(), vec!["RefreshMsg", "StatusMsg", "RefreshMsg"]);
}

#[test]
fn test_rejected_login_fails_session() {
    let net = SimNetwork::new();
    net.add_provider_with("A", ProviderConfig { accept_login: false, ..Default::default() }, vec![direct_feed(10)]);
    let result = Harness::try_new(net, config(&["A"]));
    assert!(matches!(result, Err(SessionError::NoChannelLoggedIn(_))));
}

#[test]
fn test_unreachable_channels_fail_session() {
    let net = SimNetwork::new();
    net.add_provider_with("A", ProviderConfig { reachable: false, ..Default::default() }, vec![direct_feed(10)]);
    let mut cfg = config(&["A"]);
    cfg.reconnect.attempt_limit = 0;
    let result = Harness::try_new(net, cfg);
    assert!(matches!(result, Err(SessionError::NoChannelLoggedIn(_))));
}

#[test]
fn test_rejected_channel_is_not_retried() {
    let net = SimNetwork::new();
    net.add_provider_with("A", ProviderConfig { accept_login: false, ..Default::default() }, vec![direct_feed(10)]);
    net.add_provider("B", vec![direct_feed(20)]);
    let h = Harness::new(net, config(&["A", "B"]));

    assert_eq!(channel_state(&h, "A"), ChannelState::Closed);
    assert_eq!(channel_state(&h, "B"), ChannelState::Active);

    h.advance(Duration::from_secs(30));
    assert_eq!(h.net.connect_count("A"), 1);

    let (_, recorder) = h.open(ibm());
    assert_eq!(h.net.item_requests("B").len(), 1);
    assert_eq!(recorder.refreshes().len(), 1);
}
