use parkwatch::{ClientEvent, ConnectionEvent, ConnectionState, Frame};
use parkwatch_devkit::test_utils::{count_lifecycle, states};
use parkwatch_devkit::{ParkingMessageBuilder, TestHarness};
use std::time::Duration;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(60);

/// Temps virtuel écoulé, à l'arrondi du tick de timer près.
fn took(since: Instant, secs: u64) -> bool {
    let elapsed = since.elapsed();
    elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_secs(secs) + Duration::from_millis(100)
}

fn connectivity(up: bool) -> ClientEvent {
    ClientEvent::Lifecycle(ConnectionEvent::ConnectivityChanged(up))
}

#[tokio::test(start_paused = true)]
async fn test_two_handshake_failures_then_success() {
    let mut harness = TestHarness::new();
    harness.connector.refuse("server busy");
    harness.connector.refuse("server busy");
    let _peer = harness.connector.accept();

    assert_eq!(harness.handle.connection_state(), ConnectionState::Idle);
    harness.start().unwrap();

    let mut events = harness.wait_for(WAIT, |e| *e == connectivity(true)).await.unwrap();
    events.extend(harness.collect(Duration::from_millis(100)).await);

    assert_eq!(
        states(&events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting,
            ConnectionState::Reconnecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(count_lifecycle(&events, |e| matches!(e, ConnectionEvent::AttemptFailed { .. })), 2);
    assert_eq!(count_lifecycle(&events, |e| *e == ConnectionEvent::ConnectivityChanged(true)), 1);
    assert_eq!(
        count_lifecycle(&events, |e| matches!(e, ConnectionEvent::AttemptStarted(_))),
        3
    );
    assert_eq!(harness.connector.attempts(), 3);
    assert_eq!(harness.handle.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_grow_and_cap() {
    let mut harness = TestHarness::new();
    for _ in 0..5 {
        harness.connector.refuse("down");
    }
    let _peer = harness.connector.accept();

    let started = Instant::now();
    harness.start().unwrap();
    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    // 1 + 2 + 4 + 5 + 5
    assert!(took(started, 17), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_server_shutdown_reinitiates_connection() {
    let mut harness = TestHarness::new();
    let first = harness.connector.accept();
    let _second = harness.connector.accept();
    harness.start().unwrap();
    harness.wait_for(WAIT, |e| *e == connectivity(true)).await.unwrap();

    assert!(first.shutdown());
    let events = harness.wait_for_state(ConnectionState::Reconnecting, WAIT).await.unwrap();
    assert_eq!(states(&events), vec![ConnectionState::Idle, ConnectionState::Reconnecting]);
    assert!(events.contains(&connectivity(false)));

    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert_eq!(harness.connector.attempts(), 2);
    assert!(first.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_network_drop_retries_from_base_delay() {
    let mut harness = TestHarness::new();
    for _ in 0..3 {
        harness.connector.refuse("unreachable");
    }
    let first = harness.connector.accept();
    let _second = harness.connector.accept();
    harness.start().unwrap();
    harness.wait_for(WAIT, |e| *e == connectivity(true)).await.unwrap();

    let dropped = Instant::now();
    assert!(first.drop_connection("connection reset"));
    let events = harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    assert_eq!(states(&events), vec![ConnectionState::Reconnecting, ConnectionState::Connected]);
    assert_eq!(events.first(), Some(&connectivity(false)));
    assert!(took(dropped, 1), "{:?}", dropped.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_hang_times_out() {
    let mut harness = TestHarness::new();
    harness.connector.hang();
    let _peer = harness.connector.accept();

    let started = Instant::now();
    harness.start().unwrap();
    let events = harness
        .wait_for(WAIT, |e| matches!(e, ClientEvent::Lifecycle(ConnectionEvent::AttemptFailed { .. })))
        .await
        .unwrap();

    assert!(took(started, 20), "{:?}", started.elapsed());
    match events.last() {
        Some(ClientEvent::Lifecycle(ConnectionEvent::AttemptFailed { attempt, reason })) => {
            assert_eq!(*attempt, 1);
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("unexpected {other:?}"),
    }

    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert!(took(started, 21), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_stop_delivers_nothing_more() {
    let mut harness = TestHarness::new();
    let peer = harness.connector.accept();
    harness.start().unwrap();
    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    harness.handle.stop();
    assert_eq!(harness.handle.connection_state(), ConnectionState::Idle);

    let mut builder = ParkingMessageBuilder::new();
    peer.push_frame(builder.parking_update(&[("A1", ParkingMessageBuilder::parked("29A-12345", 5.0, 5000.0))]));

    let events = harness.collect(Duration::from_secs(30)).await;
    assert_eq!(
        events,
        vec![
            connectivity(false),
            ClientEvent::Lifecycle(ConnectionEvent::StateChanged(ConnectionState::Idle)),
        ]
    );
    assert!(harness.handle.read().map.is_empty());
    assert!(peer.is_closed());
    assert_eq!(harness.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_reconnecting_gives_up() {
    let mut harness = TestHarness::new();
    for _ in 0..3 {
        harness.connector.refuse("down");
    }
    harness.start().unwrap();
    harness
        .wait_for(WAIT, |e| matches!(e, ClientEvent::Lifecycle(ConnectionEvent::AttemptFailed { .. })))
        .await
        .unwrap();

    harness.handle.stop();
    let events = harness.collect(Duration::from_secs(30)).await;
    assert_eq!(
        events,
        vec![
            ClientEvent::Lifecycle(ConnectionEvent::StateChanged(ConnectionState::Failed)),
            ClientEvent::Lifecycle(ConnectionEvent::GaveUp),
        ]
    );
    assert_eq!(harness.handle.connection_state(), ConnectionState::Failed);
    assert_eq!(harness.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forced_reconnect_opens_fresh_session() {
    let mut harness = TestHarness::new();
    assert!(!harness.handle.reconnect());

    let first = harness.connector.accept();
    let _second = harness.connector.accept();
    harness.start().unwrap();
    harness.wait_for(WAIT, |e| *e == connectivity(true)).await.unwrap();

    assert!(harness.handle.reconnect());
    let events = harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert_eq!(states(&events), vec![ConnectionState::Reconnecting, ConnectionState::Connected]);
    assert_eq!(harness.connector.attempts(), 2);
    harness.collect(Duration::from_millis(10)).await;
    assert!(first.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_request_update_only_when_connected() {
    let mut harness = TestHarness::new();
    let peer = harness.connector.accept();
    assert!(!harness.handle.request_update());

    harness.start().unwrap();
    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert!(harness.handle.request_update());

    harness.collect(Duration::from_millis(50)).await;
    assert_eq!(peer.sent(), vec![Frame::request_update()]);
}

#[tokio::test]
async fn test_start_rejects_empty_endpoint() {
    let config = parkwatch::TransportConfig {
        endpoint: String::new(),
        ..Default::default()
    };
    let harness = TestHarness::with_config(config);
    assert!(harness.start().is_err());
    assert_eq!(harness.handle.connection_state(), ConnectionState::Idle);
    assert_eq!(harness.connector.attempts(), 0);
}
