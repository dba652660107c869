//! Session relay behaviour across directory, gateway, fanout and reaper

use bytes::Bytes;
use gamecast_core::metrics::MetricsCounter;
use gamecast_core::models::StateBlob;
use gamecast_core::session::{
    fanout, ConnectionGateway, EvictionPolicy, HostConnectionState, LinkReceiver,
    LoopExit, Reaper, SessionDirectory,
};
use gamecast_core::Error;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Inbound = mpsc::Receiver<Result<Bytes, String>>;

fn setup() -> (Arc<SessionDirectory>, ConnectionGateway) {
    let directory = Arc::new(SessionDirectory::new(Arc::new(MetricsCounter::new())));
    let gateway = ConnectionGateway::new(Arc::clone(&directory), 16);
    (directory, gateway)
}

fn inbound() -> (mpsc::Sender<Result<Bytes, String>>, Inbound) {
    mpsc::channel(16)
}

fn host_frame(value: &Value) -> Result<Bytes, String> {
    Ok(Bytes::from(json!({ "stateBlob": value }).to_string()))
}

async fn next_json(rx: &mut LinkReceiver) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("link closed");
    serde_json::from_str(&frame).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_never_collide() {
    let (directory, _gateway) = setup();

    let mut handles = Vec::new();
    for task in 0..8 {
        let directory = Arc::clone(&directory);
        handles.push(tokio::spawn(async move {
            (0..50)
                .map(|i| {
                    directory
                        .create(&format!("host-{task}-{i}"), StateBlob::from("{}"))
                        .unwrap()
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.extend(handle.await.unwrap());
    }

    let stats = directory.metrics().snapshot();
    assert_eq!(ids.len(), 400);
    assert_eq!(directory.len(), 400);
    assert_eq!(stats.active_games, 400);
    assert_eq!(stats.total_games_created, 400);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (directory, gateway) = setup();

    assert!(matches!(directory.get("does-not-exist"), Err(Error::NotFound(_))));
    assert!(matches!(
        gateway.viewer_join(Some("does-not-exist")),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn host_reconnects_after_disconnect() {
    let (directory, gateway) = setup();
    let id = directory.create("host-1", StateBlob::from(r#"{"round":1}"#)).unwrap();
    let (viewer, mut viewer_rx) = gateway.viewer_join(Some(id.as_str())).unwrap();
    next_json(&mut viewer_rx).await;

    let (host, _host_rx) = gateway.host_connect(Some(id.as_str()), Some("host-1")).unwrap();
    let (tx, mut stream) = inbound();
    drop(tx);
    assert_eq!(host.run(&mut stream).await, LoopExit::ClientClosed);
    drop(host);

    let record = directory.get(id.as_str()).unwrap();
    assert_eq!(record.host_state(), HostConnectionState::Disconnected);
    assert_eq!(record.host_link_id(), None);
    assert_eq!(next_json(&mut viewer_rx).await, json!({"type": "hostDisconnected"}));

    let (host, _host_rx) = gateway.host_connect(Some(id.as_str()), Some("host-1")).unwrap();
    assert_eq!(host.session_id(), &id);
    assert_eq!(record.host_state(), HostConnectionState::Connected);
    assert_eq!(next_json(&mut viewer_rx).await, json!({"type": "hostReconnected"}));
    assert_eq!(directory.metrics().snapshot().total_host_connections, 2);

    drop(viewer);
}

#[tokio::test]
async fn mismatched_host_leaves_state_unchanged() {
    let (directory, gateway) = setup();
    let id = directory.create("host-1", StateBlob::from("{}")).unwrap();

    let result = gateway.host_connect(Some(id.as_str()), Some("host-2"));

    assert!(matches!(result, Err(Error::Unauthorized(_))));
    let record = directory.get(id.as_str()).unwrap();
    assert_eq!(record.host_state(), HostConnectionState::NeverConnected);
    assert_eq!(directory.metrics().snapshot().total_host_connections, 0);
}

#[tokio::test]
async fn transport_failure_keeps_session() {
    let (directory, gateway) = setup();
    let id = directory.create("host-1", StateBlob::from("{}")).unwrap();
    let (host, _host_rx) = gateway.host_connect(Some(id.as_str()), Some("host-1")).unwrap();
    let (tx, mut stream) = inbound();
    tx.send(Err("reset by peer".to_string())).await.unwrap();

    let exit = host.run(&mut stream).await;
    drop(host);

    assert!(matches!(exit, LoopExit::TransportFailed(_)));
    let record = directory.get(id.as_str()).unwrap();
    assert_eq!(record.host_state(), HostConnectionState::Disconnected);
    assert_eq!(record.host_link_id(), None);
}

#[tokio::test]
async fn fanout_removes_only_failed_viewers() {
    let (directory, gateway) = setup();
    let id = directory.create("host-1", StateBlob::from("{}")).unwrap();
    let record = directory.get(id.as_str()).unwrap();

    let mut sessions = Vec::new();
    let mut live = Vec::new();
    let mut expected = Vec::new();
    for i in 0..6 {
        let (viewer, rx) = gateway.attach_viewer(Arc::clone(&record)).unwrap();
        if i % 3 == 0 {
            drop(rx);
        } else {
            expected.push(viewer.link_id());
            live.push(rx);
        }
        sessions.push(viewer);
    }

    let report = fanout(&record, &Arc::from(r#"{"type":"gameState","gameState":{}}"#));

    assert_eq!(report.pruned, 2);
    assert_eq!(report.delivered, 4);
    assert_eq!(record.viewer_ids(), expected);

    drop(sessions);
    assert_eq!(directory.metrics().snapshot().total_viewers, 0);
}

#[tokio::test(start_paused = true)]
async fn stale_sessions_are_evicted_by_next_sweep() {
    let (directory, gateway) = setup();
    let reaper = Reaper::new(
        Arc::clone(&directory),
        EvictionPolicy::default(),
        Duration::from_secs(300),
    );

    let idle = directory.create("host", StateBlob::from("{}")).unwrap();
    let aged = directory.create("host", StateBlob::from("{}")).unwrap();
    let (_viewer, mut viewer_rx) = gateway.viewer_join(Some(idle.as_str())).unwrap();
    next_json(&mut viewer_rx).await;

    // Keep `aged` active every hour for 12h + 1s
    let aged_record = directory.get(aged.as_str()).unwrap();
    for _ in 0..12 {
        tokio::time::advance(Duration::from_secs(3600)).await;
        gamecast_core::session::publish(&aged_record, StateBlob::from("{}")).unwrap();
    }
    tokio::time::advance(Duration::from_secs(1)).await;
    let fresh = directory.create("host", StateBlob::from("{}")).unwrap();

    let report = reaper.sweep();

    assert_eq!(report.evicted, 2);
    assert_eq!(report.remaining, 1);
    assert!(directory.get(idle.as_str()).is_err());
    assert!(directory.get(aged.as_str()).is_err());
    assert!(directory.get(fresh.as_str()).is_ok());
    assert_eq!(directory.metrics().snapshot().active_games, 1);
    // The evicted session's viewer link was closed
    assert_eq!(viewer_rx.recv().await, None);
}

#[tokio::test]
async fn end_to_end_relay_is_isolated_per_session() {
    let (directory, gateway) = setup();
    let game = directory.create("host-1", StateBlob::from(r#"{"round":1}"#)).unwrap();
    let other = directory.create("host-2", StateBlob::from(r#"{"other":true}"#)).unwrap();

    let (_viewer, mut viewer_rx) = gateway.viewer_join(Some(game.as_str())).unwrap();
    let (_bystander, mut bystander_rx) = gateway.viewer_join(Some(other.as_str())).unwrap();
    assert_eq!(
        next_json(&mut viewer_rx).await,
        json!({"type": "gameState", "gameState": {"round": 1}})
    );
    next_json(&mut bystander_rx).await;

    let (host, mut host_rx) = gateway.host_connect(Some(game.as_str()), Some("host-1")).unwrap();
    let (tx, mut stream) = inbound();
    let host_task = tokio::spawn(async move {
        let exit = host.run(&mut stream).await;
        drop(host);
        exit
    });

    tx.send(host_frame(&json!({"round": 2}))).await.unwrap();
    assert_eq!(
        next_json(&mut viewer_rx).await,
        json!({"type": "gameState", "gameState": {"round": 2}})
    );

    drop(tx);
    assert_eq!(host_task.await.unwrap(), LoopExit::ClientClosed);
    assert_eq!(next_json(&mut viewer_rx).await, json!({"type": "hostDisconnected"}));

    // Nothing reached the other session, and the host never saw a join
    assert!(
        tokio::time::timeout(Duration::from_millis(50), bystander_rx.recv())
            .await
            .is_err()
    );
    assert_eq!(host_rx.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn viewer_join_and_leave_keep_session_alive() {
    let (directory, gateway) = setup();
    let reaper = Reaper::new(
        Arc::clone(&directory),
        EvictionPolicy::default(),
        Duration::from_secs(300),
    );
    let id = directory.create("host", StateBlob::from("{}")).unwrap();

    tokio::time::advance(Duration::from_secs(7000)).await;
    let (viewer, mut viewer_rx) = gateway.viewer_join(Some(id.as_str())).unwrap();
    next_json(&mut viewer_rx).await;

    tokio::time::advance(Duration::from_secs(7000)).await;
    drop(viewer);

    // 21000s since creation, 7000s since the viewer left
    tokio::time::advance(Duration::from_secs(7000)).await;
    let report = reaper.sweep();

    assert_eq!(report.evicted, 0);
    assert!(directory.get(id.as_str()).is_ok());
}

#[tokio::test(start_paused = true)]
async fn eviction_closes_the_host_link() {
    let (directory, gateway) = setup();
    let reaper = Reaper::new(
        Arc::clone(&directory),
        EvictionPolicy::default(),
        Duration::from_secs(300),
    );
    let id = directory.create("host-1", StateBlob::from("{}")).unwrap();
    let (host, mut host_rx) = gateway.host_connect(Some(id.as_str()), Some("host-1")).unwrap();
    let record = Arc::clone(host.record());
    assert_eq!(record.host_state(), HostConnectionState::Connected);

    tokio::time::advance(Duration::from_secs(7300)).await;
    let report = reaper.sweep();

    assert_eq!(report.evicted, 1);
    assert_eq!(host_rx.recv().await, None);

    let (_tx, mut stream) = inbound();
    assert_eq!(host.run(&mut stream).await, LoopExit::LinkClosed);
    drop(host);
    assert_eq!(record.host_state(), HostConnectionState::Disconnected);
}

#[tokio::test]
async fn remove_closes_the_host_link() {
    let (directory, gateway) = setup();
    let id = directory.create("host-1", StateBlob::from("{}")).unwrap();
    let (host, mut host_rx) = gateway.host_connect(Some(id.as_str()), Some("host-1")).unwrap();

    assert!(directory.remove(id.as_str()));

    assert_eq!(host_rx.recv().await, None);
    let (_tx, mut stream) = inbound();
    assert_eq!(host.run(&mut stream).await, LoopExit::LinkClosed);
}
