use parkwatch::view::EMPTY_SLOT_TOOLTIP;
use parkwatch::{load_config, ClientEvent, ConnectionState, Mode, Notice, ParkingClient, SlotStatus, TransportConfig};
use parkwatch_devkit::{MockConnector, MockPeer, ParkingMessageBuilder as Msg, TestHarness};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn connected() -> (TestHarness, MockPeer) {
    let mut harness = TestHarness::new();
    let peer = harness.connector.accept();
    harness.start().unwrap();
    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    (harness, peer)
}

async fn next_message(harness: &mut TestHarness) {
    harness
        .wait_for(WAIT, |e| matches!(e, ClientEvent::Message(_)))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_update_projects_full_grid() {
    let (mut harness, peer) = connected().await;
    let mut builder = Msg::new();
    peer.push_frame(builder.parking_update(&[("A1", Msg::parked("29A-12345", 45.0, 10000.0))]));
    next_message(&mut harness).await;

    let grid = harness.handle.grid();
    assert_eq!(grid.cells().count(), 60);
    assert_eq!(grid.floors.len(), 6);
    assert_eq!(grid.floors[0].title, "Tầng A");

    let empty: Vec<_> = grid.cells().filter(|c| !c.occupied).collect();
    assert_eq!(empty.len(), 59);
    assert!(empty.iter().all(|c| c.vehicle.is_none() && c.tooltip == EMPTY_SLOT_TOOLTIP));

    let a1 = grid.cell(&"A1".parse().unwrap()).unwrap();
    let vehicle = a1.vehicle.as_ref().unwrap();
    assert_eq!(vehicle.license_plate, "29A-12345");
    assert_eq!(vehicle.duration, "45 phút");
    assert_eq!(vehicle.cost, "10.000 đ");
    assert_eq!(a1.tooltip, "29A-12345 - 45 phút - 10.000 VNĐ");

    let listing = harness.handle.listing();
    assert_eq!(listing.rows.len(), 1);
    assert_eq!(listing.empty_message(), None);

    let stats = harness.handle.stats();
    assert_eq!(stats.occupied_count, 1);
    assert_eq!(stats.available_count, 59);
    assert_eq!(stats.revenue, "10.000 VNĐ");
    assert!(stats.consistent);
}

#[tokio::test(start_paused = true)]
async fn test_updates_replace_previous_snapshot() {
    let (mut harness, peer) = connected().await;
    let mut builder = Msg::new();

    peer.push_frame(Msg::connected());
    peer.push_frame(builder.initial_state(&[
        ("A1", Msg::parked("29A-12345", 45.0, 10000.0)),
        ("F10", Msg::parked("30F-22222", 125.0, 50000.0)),
    ]));
    peer.push_frame(builder.parking_update(&[("B2", Msg::slot("51B-33333", "ENTERING", 0.0, 0, 0.0))]));
    for _ in 0..3 {
        next_message(&mut harness).await;
    }

    let state = harness.handle.read();
    assert_eq!(state.map.len(), 1);
    assert_eq!(state.slot(&"B2".parse().unwrap()).unwrap().status, SlotStatus::Entering);
    assert_eq!(state.statistics.messages_processed, 2);

    // les véhicules en entrée sont sur la grille, pas dans la liste
    assert_eq!(harness.handle.grid().cells().filter(|c| c.occupied).count(), 1);
    let listing = harness.handle.listing();
    assert!(listing.rows.is_empty());
    assert_eq!(listing.empty_message(), Some("Chưa có xe nào đang đỗ"));
    assert_eq!(harness.handle.health().messages_applied, 2);
}

#[tokio::test(start_paused = true)]
async fn test_observers_see_each_change_once() {
    let (mut harness, peer) = connected().await;
    let mut reader = harness.handle.watch_state();
    let mut builder = Msg::new();
    let slots = [("C3", Msg::parked("29C-44444", 61.0, 20000.0))];

    let frame = builder.parking_update(&slots);
    peer.push_frame(frame.clone());
    next_message(&mut harness).await;
    let seen = reader.changed().await.unwrap();
    assert_eq!(seen.map.len(), 1);

    // payload identique : pas de nouvel instantané
    peer.push_frame(frame);
    next_message(&mut harness).await;
    assert!(tokio::time::timeout(Duration::from_millis(50), reader.changed()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_vehicle_exit_is_a_notice_only() {
    let (mut harness, peer) = connected().await;
    let mut notices = harness.handle.subscribe_notices();
    let mut builder = Msg::new();

    peer.push_frame(builder.parking_update(&[("D4", Msg::parked("59D-98765", 30.0, 5000.0))]));
    peer.push_frame(Msg::vehicle_exited("59D-98765", "D4", 30.0, 1, 5000.0));
    next_message(&mut harness).await;
    next_message(&mut harness).await;

    assert_eq!(harness.handle.read().map.len(), 1);

    let mut exits = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        if let Notice::VehicleExited(exit) = notice {
            exits.push(exit);
        }
    }
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].location.as_deref(), Some("D4"));
    assert_eq!(exits[0].final_cost, Some(5000.0));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_do_not_disturb_state() {
    let (mut harness, peer) = connected().await;
    let mut builder = Msg::new();
    peer.push_frame(builder.parking_update(&[("E5", Msg::parked("29E-55555", 10.0, 3000.0))]));
    next_message(&mut harness).await;

    peer.push("unknown_event", serde_json::json!({"x": 1}));
    peer.push("parking_update", serde_json::json!("not an object"));
    harness.collect(Duration::from_millis(50)).await;

    let state = harness.handle.read();
    assert_eq!(state.map.len(), 1);
    assert_eq!(harness.handle.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_status_bar_follows_connection() {
    let mut harness = TestHarness::new();
    assert_eq!(harness.handle.status_bar().connection_label, "Chưa kết nối");

    let peer = harness.connector.accept();
    harness.start().unwrap();
    harness.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    let bar = harness.handle.status_bar();
    assert!(bar.connected);
    assert_eq!(bar.connection_label, "Đã kết nối");
    assert_eq!(bar.mode_label, "Local");

    peer.drop_connection("cable pulled");
    harness.wait_for_state(ConnectionState::Reconnecting, WAIT).await.unwrap();
    assert_eq!(harness.handle.status_bar().connection_label, "Chưa kết nối");
    assert_eq!(harness.handle.health().status, "reconnecting");
}

#[tokio::test]
async fn test_client_resolves_config_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "mode: distributed\nfrontend:\n  websocket_url: http://10.1.2.3:5000\n").unwrap();

    let connector = MockConnector::new();
    let _peer = connector.accept();
    let mut client = ParkingClient::resolve(load_config(&path, TransportConfig::default()), Arc::new(connector.clone())).await;
    assert_eq!(client.config().mode, Mode::Distributed);

    client.start().unwrap();
    while client.handle().connection_state() != ConnectionState::Connected {
        client.step().await.unwrap();
    }
    assert_eq!(connector.endpoints(), vec!["http://10.1.2.3:5000/".to_string()]);
    assert_eq!(client.handle().status_bar().mode_label, "Distributed");
    client.handle().stop();
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_after_stop() {
    let mut harness = TestHarness::new();
    let peer = harness.connector.accept();
    harness.start().unwrap();
    peer.push_frame(Msg::new().parking_update(&[("B3", Msg::parked("51F-00001", 5.0, 5000.0))]));

    let handle = harness.handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
    });

    tokio::time::timeout(WAIT, harness.client.run())
        .await
        .expect("run() should return once stopped");
    assert_eq!(harness.handle.read().map.len(), 1);
    assert_eq!(harness.handle.health().status, "idle");
    assert_eq!(harness.handle.connection_state(), ConnectionState::Idle);

    // jamais démarré : rien à attendre
    let mut idle = TestHarness::new();
    tokio::time::timeout(WAIT, idle.client.run()).await.unwrap();
}
