//! Session lifecycle: resumption, expiry, read-only mode, auth and close.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, next_event, wait_for_state, Ensemble};
use parking_lot::Mutex;
use zookeeper_client::{
    ConnectionState, CreateOptions, OperationOptions, ReplayPolicy, SessionEvent, StateListener,
    ZkError, ZooKeeper,
};

#[tokio::test]
async fn test_session_survives_connection_drop() {
    let ensemble = Ensemble::start(2).await;
    let zk = ensemble.client().await;
    zk.create("/survivor", CreateOptions::new().data(b"alive".to_vec()))
        .await
        .unwrap();
    let session_id = zk.session_id();
    let password = zk.session_password();
    let mut events = zk.subscribe_state();

    ensemble.drop_connections();

    next_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    let connected = next_event(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    assert_eq!(
        connected,
        SessionEvent::Connected {
            session_id,
            address: zk.connected_server().unwrap(),
            read_only: false,
        }
    );

    assert_eq!(zk.session_id(), session_id);
    assert_eq!(zk.session_password(), password);
    let (data, _) = zk.get_data("/survivor").await.unwrap();
    assert_eq!(data, b"alive");
}

#[tokio::test]
async fn test_session_moves_to_another_server() {
    let ensemble = Ensemble::start(2).await;
    let zk = ensemble.client().await;
    let first = zk.connected_server().unwrap();
    let mut events = zk.subscribe_state();

    let index = if ensemble.server(0).address() == first { 0 } else { 1 };
    ensemble.server(index).set_refusing(true);
    ensemble.drop_connections();

    next_event(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    let second = zk.connected_server().unwrap();
    assert_ne!(first, second);
    assert!(zk.exists("/").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reads_wait_for_reconnect() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;
    zk.create("/queued", CreateOptions::new().data(b"ok".to_vec()))
        .await
        .unwrap();

    ensemble.server(0).set_refusing(true);
    ensemble.drop_connections();
    wait_for_state(&zk, ConnectionState::Connecting).await;

    let reader = {
        let zk = zk.clone();
        tokio::spawn(async move { zk.get_data("/queued").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!reader.is_finished());

    ensemble.server(0).set_refusing(false);
    let (data, _) = reader.await.unwrap().unwrap();
    assert_eq!(data, b"ok");
}

#[tokio::test]
async fn test_in_flight_write_fails_on_disconnect() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;
    zk.create("/pending", CreateOptions::new()).await.unwrap();

    ensemble.server(0).set_stalled(true);
    let writer = {
        let zk = zk.clone();
        tokio::spawn(async move { zk.set_data("/pending", b"lost".to_vec(), None).await })
    };
    eventually(|| ensemble.request_count("SetData") == 1).await;

    ensemble.server(0).set_stalled(false);
    ensemble.drop_connections();

    let err = writer.await.unwrap().unwrap_err();
    assert!(matches!(err, ZkError::ConnectionLoss(_)), "{:?}", err);
    wait_for_state(&zk, ConnectionState::SyncConnected).await;
}

#[tokio::test]
async fn test_write_with_replay_survives_disconnect() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;

    ensemble.server(0).set_refusing(true);
    ensemble.drop_connections();
    wait_for_state(&zk, ConnectionState::Connecting).await;

    let writer = {
        let zk = zk.clone();
        tokio::spawn(async move {
            zk.create_with(
                "/replayed",
                CreateOptions::new(),
                &OperationOptions::new().replay(ReplayPolicy::OnReconnect),
            )
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    ensemble.server(0).set_refusing(false);

    assert_eq!(writer.await.unwrap().unwrap(), "/replayed");
    assert!(ensemble.exists("/replayed"));
}

#[tokio::test]
async fn test_request_timeout() {
    let ensemble = Ensemble::start(1).await;
    let zk = ZooKeeper::connect(
        ensemble
            .config()
            .request_timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    ensemble.server(0).set_stalled(true);
    assert!(matches!(
        zk.exists("/slow").await,
        Err(ZkError::OperationTimeout)
    ));
    assert!(matches!(
        zk.exists_with(
            "/slow",
            &OperationOptions::new().timeout(Duration::from_millis(20))
        )
        .await,
        Err(ZkError::OperationTimeout)
    ));
}

#[tokio::test]
async fn test_unresponsive_server_is_abandoned() {
    let ensemble = Ensemble::start(1).await;
    let zk = ZooKeeper::connect(
        ensemble
            .config()
            .session_timeout(Duration::from_millis(900))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let mut events = zk.subscribe_state();

    ensemble.server(0).set_stalled(true);
    let disconnected =
        next_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    match disconnected {
        SessionEvent::Disconnected { reason, .. } => assert!(reason.contains("no reply"), "{}", reason),
        other => panic!("unexpected {:?}", other),
    }

    ensemble.server(0).set_stalled(false);
    next_event(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
}

#[tokio::test]
async fn test_heartbeats_keep_idle_session_alive() {
    let ensemble = Ensemble::start(1).await;
    let zk = ZooKeeper::connect(
        ensemble
            .config()
            .session_timeout(Duration::from_millis(600))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(zk.state(), ConnectionState::SyncConnected);
    assert!(ensemble.request_count("Ping") >= 3);
}

#[tokio::test]
async fn test_server_side_expiry() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;
    let observer = ensemble.client().await;
    zk.create("/ephemeral", CreateOptions::ephemeral())
        .await
        .unwrap();
    let (_, ticket) = zk.exists_w("/never").await.unwrap();
    let session_id = zk.session_id();
    let mut events = zk.subscribe_state();

    ensemble.expire_session(session_id);

    let expired = next_event(&mut events, |e| matches!(e, SessionEvent::Expired { .. })).await;
    assert_eq!(expired, SessionEvent::Expired { session_id });
    assert_eq!(zk.state(), ConnectionState::Expired);
    assert!(matches!(ticket.await, Err(ZkError::SessionExpired)));
    assert!(matches!(
        zk.get_data("/ephemeral").await,
        Err(ZkError::SessionExpired)
    ));
    assert!(matches!(
        zk.add_auth("digest", "a:b"),
        Err(ZkError::SessionExpired)
    ));
    assert_eq!(observer.exists("/ephemeral").await.unwrap(), None);
}

#[tokio::test]
async fn test_client_side_expiry_when_unreachable() {
    let ensemble = Ensemble::start(1).await;
    let zk = ZooKeeper::connect(
        ensemble
            .config()
            .session_timeout(Duration::from_millis(600))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let (_, _, ticket) = zk.get_children_w("/").await.unwrap();

    ensemble.server(0).set_refusing(true);
    ensemble.drop_connections();

    wait_for_state(&zk, ConnectionState::Expired).await;
    assert!(matches!(ticket.await, Err(ZkError::SessionExpired)));
    assert!(matches!(zk.exists("/").await, Err(ZkError::SessionExpired)));
}

#[tokio::test]
async fn test_hanging_handshake_does_not_delay_expiry() {
    let ensemble = Ensemble::start(1).await;

    // Closes connections at once until `silent` is set, then holds them open
    // without ever answering the handshake.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_address = listener.local_addr().unwrap();
    let silent = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let accept = {
        let silent = Arc::clone(&silent);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                if silent.load(std::sync::atomic::Ordering::SeqCst) {
                    held.push(socket);
                }
            }
        })
    };

    let zk = ZooKeeper::connect(
        ensemble
            .config()
            .add_server(silent_address.to_string())
            .session_timeout(Duration::from_millis(600))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    silent.store(true, std::sync::atomic::Ordering::SeqCst);
    ensemble.server(0).set_refusing(true);
    let started = tokio::time::Instant::now();
    ensemble.drop_connections();

    wait_for_state(&zk, ConnectionState::Expired).await;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "expiry took {:?}",
        started.elapsed()
    );
    accept.abort();
}

#[tokio::test]
async fn test_read_only_server() {
    let ensemble = Ensemble::start(1).await;
    ensemble.server(0).set_read_only(true);

    let refused = ZooKeeper::connect(
        ensemble
            .config()
            .retry(|r| r.max_retries(1).initial_backoff(Duration::from_millis(1)))
            .build()
            .unwrap(),
    )
    .await;
    assert!(matches!(refused, Err(ZkError::ConnectionLoss(_))));

    let zk = ZooKeeper::connect(ensemble.config().can_be_read_only(true).build().unwrap())
        .await
        .unwrap();
    assert_eq!(zk.state(), ConnectionState::ReadOnly);
    assert!(zk.state().is_connected());

    assert!(zk.get_children("/").await.is_ok());
    assert!(matches!(
        zk.create("/blocked", CreateOptions::new()).await,
        Err(ZkError::NotWritable)
    ));
    assert!(matches!(
        zk.transaction().check("/", -1).commit().await,
        Err(ZkError::NotWritable)
    ));
    assert_eq!(ensemble.request_count("Create"), 0);
}

#[tokio::test]
async fn test_credentials_are_resent_on_reconnect() {
    let ensemble = Ensemble::start(1).await;
    let zk = ZooKeeper::connect(
        ensemble
            .config()
            .add_auth("digest", "app:secret")
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    zk.sync("/").await.unwrap();
    assert_eq!(ensemble.auth_schemes(zk.session_id()), vec!["digest"]);

    let mut events = zk.subscribe_state();
    ensemble.drop_connections();
    next_event(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    zk.sync("/").await.unwrap();
    assert_eq!(ensemble.auth_schemes(zk.session_id()), vec!["digest"]);

    zk.add_auth("digest", "ops:secret").unwrap();
    zk.sync("/").await.unwrap();
    assert_eq!(
        ensemble.auth_schemes(zk.session_id()),
        vec!["digest", "digest"]
    );
}

#[tokio::test]
async fn test_rejected_credentials_end_the_session() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;
    let mut events = zk.subscribe_state();

    zk.add_auth("ip", "not-accepted").unwrap();

    next_event(&mut events, |e| matches!(e, SessionEvent::AuthFailed)).await;
    assert_eq!(zk.state(), ConnectionState::AuthFailed);
    assert!(matches!(zk.exists("/").await, Err(ZkError::AuthFailed)));
}

#[tokio::test]
async fn test_close_ends_session() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;
    let session_id = zk.session_id();
    let (_, _, ticket) = zk.get_data_w("/").await.unwrap();

    zk.close().await.unwrap();
    assert_eq!(zk.state(), ConnectionState::Closed);
    assert!(!ensemble.has_session(session_id));
    assert!(matches!(ticket.await, Err(ZkError::Closed)));
    assert!(matches!(zk.exists("/").await, Err(ZkError::Closed)));

    // Closing twice is fine.
    zk.close().await.unwrap();
}

#[tokio::test]
async fn test_close_while_disconnected() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;

    ensemble.server(0).set_refusing(true);
    ensemble.drop_connections();
    wait_for_state(&zk, ConnectionState::Connecting).await;

    tokio::time::timeout(Duration::from_secs(2), zk.close())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(zk.state(), ConnectionState::Closed);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<&'static str>>,
}

impl StateListener for Recorder {
    fn connected(&self, _session_id: i64, _read_only: bool) {
        self.seen.lock().push("connected");
    }

    fn disconnected(&self, _reason: &str) {
        self.seen.lock().push("disconnected");
    }

    fn closed(&self) {
        self.seen.lock().push("closed");
    }
}

struct Shared(Arc<Recorder>);

impl StateListener for Shared {
    fn connected(&self, session_id: i64, read_only: bool) {
        self.0.connected(session_id, read_only)
    }

    fn disconnected(&self, reason: &str) {
        self.0.disconnected(reason)
    }

    fn closed(&self) {
        self.0.closed()
    }
}

#[tokio::test]
async fn test_state_listener_sees_transitions() {
    let ensemble = Ensemble::start(1).await;
    let zk = ensemble.client().await;
    let recorder = Arc::new(Recorder::default());
    let registration = zk.add_state_listener(Shared(Arc::clone(&recorder)));
    assert!(registration.is_active());

    ensemble.drop_connections();
    eventually(|| recorder.seen.lock().contains(&"connected")).await;
    zk.close().await.unwrap();
    eventually(|| recorder.seen.lock().last() == Some(&"closed")).await;

    let seen = recorder.seen.lock().clone();
    assert_eq!(seen.first(), Some(&"disconnected"));
}
