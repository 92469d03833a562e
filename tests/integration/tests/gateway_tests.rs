//! Gateway client end-to-end tests
//!
//! Every test drives a real client against the scripted in-memory transport,
//! so no network is needed.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use chat_gateway_client::{
    ClientState, ConnectionError, GatewayError, IdentifyCoordinator, IdentifyRequest,
    IdentifyToken, OpCode, PresenceUpdatePayload, ReconnectBackoff, StateTransition,
};
use integration_tests::*;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

async fn next_transition(
    transitions: &mut broadcast::Receiver<StateTransition>,
) -> StateTransition {
    tokio::time::timeout(EXPECT_TIMEOUT, transitions.recv())
        .await
        .expect("no transition in time")
        .expect("transition channel closed")
}

// ============================================================================
// Handshake scenarios
// ============================================================================

#[tokio::test]
async fn test_hello_identify_ready() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();

    client.connect().await.unwrap();
    let endpoint = mock.expect_opened().await.unwrap();
    assert_eq!(endpoint, "ws://gateway.mock/?v=10&encoding=json");
    assert_eq!(client.state(), ClientState::AwaitingHello);

    mock.push(hello(QUIET_HEARTBEAT_MS));
    let identify = mock.expect_sent(OpCode::Identify).await.unwrap();
    assert_eq!(identify.d["token"], TEST_TOKEN);
    assert_eq!(identify.d["large_threshold"], 250);

    mock.push(ready("session-1", 1));
    let event = next_dispatch(&mut events).await.unwrap();
    assert_eq!(event.name, "READY");
    assert_eq!(event.sequence, Some(1));

    reach(&client, ClientState::Ready).await.unwrap();
    assert_eq!(client.sequence(), Some(1));
    assert_eq!(client.session_id().as_deref(), Some("session-1"));
    assert!(mock.sent(OpCode::Resume).is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_request_resumes_session() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.push(dispatch("MESSAGE_CREATE", 5, json!({"content": "hi"})));
    assert_eq!(next_dispatch(&mut events).await.unwrap().sequence, Some(5));

    let mut transitions = client.transitions();
    mock.push(reconnect());

    mock.expect_closed().await.unwrap();
    let endpoint = mock.expect_opened().await.unwrap();
    assert_eq!(endpoint, "ws://resume.mock/?v=10&encoding=json");
    assert_eq!(mock.closes(), 1);

    let t = next_transition(&mut transitions).await;
    assert_eq!((t.from, t.to), (ClientState::Ready, ClientState::Reconnecting));
    let t = next_transition(&mut transitions).await;
    assert_eq!(
        (t.from, t.to),
        (ClientState::Reconnecting, ClientState::AwaitingHello)
    );

    mock.push(hello(QUIET_HEARTBEAT_MS));
    let resume = mock.expect_sent(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["seq"], 5);
    assert_eq!(resume.d["session_id"], "session-1");
    assert_eq!(resume.d["token"], TEST_TOKEN);
    assert_eq!(client.state(), ClientState::Resuming);

    mock.push(resumed(6));
    let event = next_dispatch(&mut events).await.unwrap();
    assert_eq!(event.name, "RESUMED");

    reach(&client, ClientState::Ready).await.unwrap();
    assert_eq!(client.sequence(), Some(6));
    assert_eq!(mock.sent(OpCode::Identify).len(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_invalid_session_not_resumable_identifies_again() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();
    mock.push(dispatch("MESSAGE_CREATE", 5, json!({})));
    next_dispatch(&mut events).await.unwrap();

    let mut transitions = client.transitions();
    mock.push(invalid_session(false));

    mock.expect_closed().await.unwrap();
    let endpoint = mock.expect_opened().await.unwrap();
    assert!(endpoint.starts_with(TEST_URL));
    assert_eq!(client.session_id(), None);

    let path: Vec<ClientState> = [
        next_transition(&mut transitions).await,
        next_transition(&mut transitions).await,
        next_transition(&mut transitions).await,
    ]
    .iter()
    .map(|t| t.to)
    .collect();
    assert_eq!(
        path,
        [
            ClientState::Disconnected,
            ClientState::Connecting,
            ClientState::AwaitingHello
        ]
    );

    mock.push(hello(QUIET_HEARTBEAT_MS));
    mock.expect_sent(OpCode::Identify).await.unwrap();
    assert!(mock.sent(OpCode::Resume).is_empty());

    mock.push(ready("session-2", 1));
    let event = next_dispatch(&mut events).await.unwrap();
    assert_eq!(event.name, "READY");
    reach(&client, ClientState::Ready).await.unwrap();
    assert_eq!(client.sequence(), Some(1));
    assert_eq!(client.session_id().as_deref(), Some("session-2"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_invalid_session_resumable_resumes() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 3)
        .await
        .unwrap();

    mock.push(invalid_session(true));
    mock.expect_closed().await.unwrap();
    mock.expect_opened().await.unwrap();
    assert_eq!(client.session_id().as_deref(), Some("session-1"));

    mock.push(hello(QUIET_HEARTBEAT_MS));
    let resume = mock.expect_sent(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["seq"], 3);

    client.shutdown().await;
}

#[tokio::test]
async fn test_dispatch_before_hello_is_not_forwarded() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(dispatch("MESSAGE_CREATE", 1, json!({})));
    mock.push(hello(QUIET_HEARTBEAT_MS));
    mock.expect_sent(OpCode::Identify).await.unwrap();
    mock.push(ready("session-1", 2));

    let event = next_dispatch(&mut events).await.unwrap();
    assert_eq!(event.name, "READY");
    assert_eq!(mock.opens(), 1);

    client.shutdown().await;
}

// ============================================================================
// Robustness
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_is_discarded() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.push("{this is not json");
    mock.push(r#"{"op": 99, "d": null}"#);
    mock.push(dispatch("MESSAGE_CREATE", 2, json!({})));

    let event = next_dispatch(&mut events).await.unwrap();
    assert_eq!(event.sequence, Some(2));
    assert_eq!(client.state(), ClientState::Ready);
    assert_eq!(mock.opens(), 1);
    assert_eq!(mock.closes(), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_sequence_never_decreases() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.push(dispatch("MESSAGE_CREATE", 5, json!({})));
    mock.push(dispatch("MESSAGE_UPDATE", 3, json!({})));

    assert_eq!(next_dispatch(&mut events).await.unwrap().sequence, Some(5));
    assert_eq!(next_dispatch(&mut events).await.unwrap().sequence, Some(3));
    assert_eq!(client.sequence(), Some(5));

    client.shutdown().await;
}

#[tokio::test]
async fn test_unacknowledged_heartbeat_forces_reconnect() {
    let mock = MockConnection::new();
    mock.silence_heartbeats();
    let (client, _events) = test_client(&mock).unwrap();

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(hello(50));
    mock.expect_sent(OpCode::Identify).await.unwrap();

    mock.expect_closed().await.unwrap();
    mock.expect_opened().await.unwrap();
    reach(&client, ClientState::AwaitingHello).await.unwrap();
    assert_eq!(mock.opens(), 2);

    // One unanswered beat is enough; no sequence was seen yet
    let beats = mock.sent(OpCode::Heartbeat);
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].d, serde_json::Value::Null);

    client.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_carry_sequence_and_record_latency() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 4)
        .await
        .unwrap();

    mock.push(heartbeat_request());
    let beat = mock.expect_heartbeat().await.unwrap();
    assert_eq!(beat.d, 4);

    let deadline = Instant::now() + EXPECT_TIMEOUT;
    while client.latency().is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.latency().is_some());
    assert_eq!(client.state(), ClientState::Ready);

    client.shutdown().await;
}

#[tokio::test]
async fn test_repeated_protocol_violations_force_reconnect() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    for _ in 0..8 {
        mock.push(hello(QUIET_HEARTBEAT_MS));
    }
    mock.expect_closed().await.unwrap();
    mock.expect_opened().await.unwrap();
    assert_eq!(mock.opens(), 2);

    client.shutdown().await;
}

// ============================================================================
// Transport loss and close codes
// ============================================================================

#[tokio::test]
async fn test_transport_drop_resumes_after_failed_opens() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 7)
        .await
        .unwrap();

    mock.fail_next_opens(2);
    mock.drop_connection(None);

    mock.expect_closed().await.unwrap();
    mock.expect_opened().await.unwrap();
    assert_eq!(mock.open_attempts(), 4);

    mock.push(hello(QUIET_HEARTBEAT_MS));
    let resume = mock.expect_sent(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["seq"], 7);

    client.shutdown().await;
}

#[tokio::test]
async fn test_handle_answers_during_reconnect_backoff() {
    let mock = MockConnection::new();
    let backoff = ReconnectBackoff {
        initial_delay: Duration::from_millis(400),
        max_delay: Duration::from_millis(400),
        backoff_factor: 1.0,
        jitter: 0.0,
    };
    let (client, mut events) = client_builder(&mock, test_config())
        .backoff(backoff)
        .build()
        .unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.fail_next_opens(3);
    mock.drop_connection(None);
    mock.expect_closed().await.unwrap();
    reach(&client, ClientState::Reconnecting).await.unwrap();

    let connected = tokio::time::timeout(Duration::from_millis(200), client.connect()).await;
    assert!(matches!(connected, Ok(Ok(()))));

    let presence = tokio::time::timeout(
        Duration::from_millis(200),
        client.update_presence(PresenceUpdatePayload::new("idle")),
    )
    .await;
    assert!(matches!(
        presence,
        Ok(Err(GatewayError::NotReady(ClientState::Reconnecting)))
    ));

    // the fourth attempt gets through
    mock.expect_opened().await.unwrap();
    assert_eq!(mock.open_attempts(), 5);

    client.shutdown().await;
}

#[tokio::test]
async fn test_authentication_failure_stops_reconnecting() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.drop_connection(Some(4004));
    mock.expect_closed().await.unwrap();
    reach(&client, ClientState::Disconnected).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.opens(), 1);
    assert_eq!(client.session_id(), None);

    // The caller may try again
    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    assert_eq!(client.state(), ClientState::AwaitingHello);

    client.shutdown().await;
}

#[tokio::test]
async fn test_session_timeout_close_identifies_fresh() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 9)
        .await
        .unwrap();

    mock.drop_connection(Some(4009));
    mock.expect_closed().await.unwrap();
    mock.expect_opened().await.unwrap();
    assert_eq!(client.session_id(), None);
    assert_eq!(client.sequence(), None);

    mock.push(hello(QUIET_HEARTBEAT_MS));
    mock.expect_sent(OpCode::Identify).await.unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let mock = MockConnection::new();
    let (client, _events) = test_client(&mock).unwrap();

    mock.fail_next_opens(1);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Connect(ConnectionError::Connect(_))
    ));
    assert_eq!(client.state(), ClientState::Disconnected);

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();

    // Already connected: a second call is a no-op
    client.connect().await.unwrap();
    assert_eq!(mock.open_attempts(), 2);

    client.shutdown().await;
}

// ============================================================================
// Identify admission
// ============================================================================

/// What the scripted coordinator saw for one grant
#[derive(Debug)]
struct Grant {
    shard_id: u32,
    identify_sent_before_release: bool,
    released: bool,
}

/// Grants tokens one at a time and records how each was released
fn spawn_recording_coordinator(
    mocks: Vec<Arc<MockConnection>>,
    grants: usize,
) -> (mpsc::Sender<IdentifyRequest>, tokio::task::JoinHandle<Vec<Grant>>) {
    let (queue, mut requests) = mpsc::channel::<IdentifyRequest>(16);
    let handle = tokio::spawn(async move {
        let mut log = Vec::new();
        for key in 0..grants as u64 {
            let Some(request) = requests.recv().await else {
                break;
            };
            let shard_id = request.shard_id();
            let (release, released) = oneshot::channel();
            request
                .grant(IdentifyToken::new(key, release))
                .expect("requester gone");
            let released = released.await.is_ok();
            let sent = mocks[shard_id as usize].sent(OpCode::Identify).len() == 1;
            log.push(Grant {
                shard_id,
                identify_sent_before_release: sent,
                released,
            });
        }
        log
    });
    (queue, handle)
}

#[tokio::test]
async fn test_identify_waits_for_admission_and_releases_once() {
    let mocks: Vec<_> = (0..3).map(|_| MockConnection::new()).collect();
    let (queue, coordinator) = spawn_recording_coordinator(mocks.clone(), 3);

    let mut clients = Vec::new();
    for (shard_id, mock) in mocks.iter().enumerate() {
        let (client, events) = client_builder(mock, test_config())
            .shard(shard_id as u32, 3)
            .identify_queue(queue.clone())
            .build()
            .unwrap();
        client.connect().await.unwrap();
        mock.expect_opened().await.unwrap();
        mock.push(hello(QUIET_HEARTBEAT_MS));
        clients.push((client, events));
    }

    for (shard_id, mock) in mocks.iter().enumerate() {
        let identify = mock.expect_sent(OpCode::Identify).await.unwrap();
        assert_eq!(identify.d["shard"], json!([shard_id, 3]));
    }

    let grants = tokio::time::timeout(EXPECT_TIMEOUT, coordinator)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grants.len(), 3);
    for grant in &grants {
        assert!(grant.released, "shard {} never released", grant.shard_id);
        assert!(grant.identify_sent_before_release);
    }

    for (client, _) in &clients {
        client.shutdown().await;
    }
}

#[tokio::test]
async fn test_resume_skips_admission() {
    let mock = MockConnection::new();
    let (queue, coordinator) = spawn_recording_coordinator(vec![mock.clone()], 1);
    let (client, mut events) = client_builder(&mock, test_config())
        .identify_queue(queue)
        .build()
        .unwrap();
    handshake(&mock, &client, &mut events, "session-1", 2)
        .await
        .unwrap();
    assert_eq!(coordinator.await.unwrap().len(), 1);

    // The coordinator is gone; a resume must not need it
    mock.push(reconnect());
    mock.expect_closed().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(hello(QUIET_HEARTBEAT_MS));
    mock.expect_sent(OpCode::Resume).await.unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_coordinator_spaces_identifies() {
    let shutdown = CancellationToken::new();
    let (queue, coordinator) = IdentifyCoordinator::new(Duration::from_millis(200));
    let coordinator = tokio::spawn(coordinator.run(shutdown.clone()));

    let mocks: Vec<_> = (0..2).map(|_| MockConnection::new()).collect();
    let mut clients = Vec::new();
    for (shard_id, mock) in mocks.iter().enumerate() {
        let (client, events) = client_builder(mock, test_config())
            .shard(shard_id as u32, 2)
            .identify_queue(queue.clone())
            .build()
            .unwrap();
        client.connect().await.unwrap();
        mock.expect_opened().await.unwrap();
        clients.push((client, events));
    }

    let start = Instant::now();
    for mock in &mocks {
        mock.push(hello(QUIET_HEARTBEAT_MS));
    }
    let identified_at = |mock: Arc<MockConnection>| async move {
        mock.expect_sent(OpCode::Identify)
            .await
            .map(|_| start.elapsed())
    };
    let (first, second) = tokio::join!(
        identified_at(mocks[0].clone()),
        identified_at(mocks[1].clone())
    );
    let gap = first.unwrap().abs_diff(second.unwrap());
    assert!(gap >= Duration::from_millis(150), "identifies only {gap:?} apart");

    shutdown.cancel();
    coordinator.await.unwrap();
    for (client, _) in &clients {
        client.shutdown().await;
    }
}

// ============================================================================
// Consumer side
// ============================================================================

#[tokio::test]
async fn test_slow_consumer_loses_nothing() {
    let mock = MockConnection::new();
    let mut config = test_config();
    config.event_buffer = 1;
    let (client, mut events) = client_builder(&mock, config).build().unwrap();

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(hello(QUIET_HEARTBEAT_MS));
    mock.expect_sent(OpCode::Identify).await.unwrap();
    mock.push(ready("session-1", 1));
    for sequence in 2..=20 {
        mock.push(dispatch("MESSAGE_CREATE", sequence, json!({"n": sequence})));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for expected in 1..=20 {
        let event = next_dispatch(&mut events).await.unwrap();
        assert_eq!(event.sequence, Some(expected));
    }
    assert_eq!(client.sequence(), Some(20));

    client.shutdown().await;
}

#[tokio::test]
async fn test_stalled_consumer_keeps_healthy_connection() {
    let mock = MockConnection::new();
    let mut config = test_config();
    config.event_buffer = 1;
    let (client, mut events) = client_builder(&mock, config).build().unwrap();

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(hello(100));
    mock.expect_sent(OpCode::Identify).await.unwrap();
    mock.push(ready("session-1", 1));
    for sequence in 2..=200 {
        mock.push(dispatch("MESSAGE_CREATE", sequence, json!({"n": sequence})));
    }

    // consumer stalls for several heartbeat intervals while the server acks every beat
    tokio::time::sleep(Duration::from_millis(600)).await;
    for expected in 1..=200 {
        let event = next_dispatch(&mut events).await.unwrap();
        assert_eq!(event.sequence, Some(expected));
    }

    assert_eq!(mock.opens(), 1);
    assert_eq!(mock.closes(), 0);
    assert_eq!(client.state(), ClientState::Ready);
    assert!(mock.sent(OpCode::Heartbeat).len() >= 2);

    client.shutdown().await;
}

#[tokio::test]
async fn test_backlog_beyond_read_ahead_is_not_a_zombie() {
    let mock = MockConnection::new();
    let mut config = test_config();
    config.event_buffer = 1;
    let (client, mut events) = client_builder(&mock, config).build().unwrap();

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(hello(100));
    mock.expect_sent(OpCode::Identify).await.unwrap();
    mock.push(ready("session-1", 1));
    for sequence in 2..=600 {
        mock.push(dispatch("MESSAGE_CREATE", sequence, json!({"n": sequence})));
    }

    // acks queue behind more frames than the client reads ahead
    tokio::time::sleep(Duration::from_millis(500)).await;
    for expected in 1..=600 {
        let event = next_dispatch(&mut events).await.unwrap();
        assert_eq!(event.sequence, Some(expected));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(mock.opens(), 1);
    assert_eq!(mock.closes(), 0);
    assert_eq!(client.state(), ClientState::Ready);

    client.shutdown().await;
}

#[tokio::test]
async fn test_ignored_events_still_advance_sequence() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    client.ignore_event("TYPING_START");
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.push(dispatch("TYPING_START", 2, json!({})));
    mock.push(dispatch("MESSAGE_CREATE", 3, json!({})));

    let event = next_dispatch(&mut events).await.unwrap();
    assert_eq!(event.name, "MESSAGE_CREATE");
    assert_eq!(client.sequence(), Some(3));

    client.restore_event("TYPING_START");
    mock.push(dispatch("TYPING_START", 4, json!({})));
    assert_eq!(next_dispatch(&mut events).await.unwrap().name, "TYPING_START");

    client.shutdown().await;
}

#[tokio::test]
async fn test_presence_update_when_ready() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    client
        .update_presence(PresenceUpdatePayload::new("idle").idle_since(1_700_000_000))
        .await
        .unwrap();
    let presence = mock.expect_sent(OpCode::StatusUpdate).await.unwrap();
    assert_eq!(presence.d["status"], "idle");
    assert_eq!(presence.d["since"], 1_700_000_000_u64);

    client.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_from_ready() {
    let mock = MockConnection::new();
    let (client, mut events) = test_client(&mock).unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    client.shutdown().await;
    client.shutdown().await;

    assert_eq!(client.state(), ClientState::ShuttingDown);
    assert_eq!(mock.closes(), 1);
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_while_waiting_for_admission() {
    let mock = MockConnection::new();
    // Never granted
    let (queue, _requests) = mpsc::channel::<IdentifyRequest>(4);
    let (client, mut events) = client_builder(&mock, test_config())
        .identify_queue(queue)
        .build()
        .unwrap();

    client.connect().await.unwrap();
    mock.expect_opened().await.unwrap();
    mock.push(hello(QUIET_HEARTBEAT_MS));
    reach(&client, ClientState::Identifying).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), client.shutdown())
        .await
        .expect("shutdown hung while waiting for admission");
    assert!(mock.sent(OpCode::Identify).is_empty());
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_signal_stops_reconnect_loop() {
    let mock = MockConnection::new();
    let signal = CancellationToken::new();
    let (client, mut events) = client_builder(&mock, test_config())
        .shutdown_signal(signal.clone())
        .build()
        .unwrap();
    handshake(&mock, &client, &mut events, "session-1", 1)
        .await
        .unwrap();

    mock.fail_next_opens(u32::MAX);
    mock.drop_connection(None);
    mock.expect_closed().await.unwrap();

    signal.cancel();
    tokio::time::timeout(Duration::from_secs(1), client.shutdown())
        .await
        .expect("shutdown hung during reconnect");
    assert_eq!(client.state(), ClientState::ShuttingDown);
}
