//! End-to-end driver tests over the in-memory transport.
//!
//! The clock is paused, so every timer (backoff dials, heartbeat ticks)
//! runs under test control via auto-advancing sleeps.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use livepulse_client::{
    ApproveAll, ChannelTransport, ConnectionManager, HistoryStore, ModerationService,
    ModerationVerdict, NoHistory, NotificationSink, NullNotifier,
};
use livepulse_core::{SessionConfig, SessionState, Topic, env::SystemEnv};
use livepulse_proto::{
    Envelope, EventKind,
    payloads::{
        ChatBody, ChatKind, EventUpdateBody, HeartbeatBody, PollActionKind, PollBody, PollOption,
        UserActionBody, UserActionKind, from_data, to_data,
    },
};

fn chat_body(envelope: &Envelope) -> ChatBody {
    from_data(&envelope.data).unwrap()
}

fn user_action_body(envelope: &Envelope) -> UserActionBody {
    from_data(&envelope.data).unwrap()
}

fn inbound_chat(id: &str, room_id: &str, message: &str, timestamp: u64) -> Envelope {
    let body = ChatBody {
        room_id: room_id.to_string(),
        user_id: "peer".to_string(),
        message: message.to_string(),
        kind: ChatKind::Text,
        timestamp,
    };
    Envelope::new(id, EventKind::Chat, to_data(&body).unwrap(), timestamp)
        .with_room(room_id)
        .with_user("peer")
}

#[tokio::test(start_paused = true)]
async fn drop_queue_and_reconnect_rejoins_rooms_before_queued_traffic() {
    let transport = ChannelTransport::new();
    let manager = ConnectionManager::new(transport.clone());

    assert!(manager.initialize("u1").await);
    manager.join_room("r1").await;
    manager.join_room("r2").await;

    let mut peer = transport.take_peer().unwrap();
    for expected in ["r1", "r2"] {
        let envelope = peer.from_client.recv().await.unwrap();
        assert_eq!(envelope.kind, EventKind::UserAction);
        assert_eq!(user_action_body(&envelope).room_id, expected);
    }

    // Kill the link; the session notices and starts reconnecting.
    drop(peer);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.connection_status().await.state, SessionState::Reconnecting);

    // Traffic produced while offline queues silently.
    assert!(manager.send_chat_message("r1", "hi", ChatKind::Text).await);
    assert!(manager.send_chat_message("r1", "there", ChatKind::Text).await);

    // First backoff attempt lands after 1s and succeeds.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let status = manager.connection_status().await;
    assert!(status.connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.rooms, vec!["r1", "r2"]);

    // On the fresh link: both rejoins first, then the queued chat in order.
    let mut peer = transport.take_peer().unwrap();
    let mut wire = Vec::new();
    for _ in 0..4 {
        wire.push(peer.from_client.recv().await.unwrap());
    }
    assert_eq!(user_action_body(&wire[0]).action, UserActionKind::JoinRoom);
    assert_eq!(user_action_body(&wire[0]).room_id, "r1");
    assert_eq!(user_action_body(&wire[1]).room_id, "r2");
    assert_eq!(chat_body(&wire[2]).message, "hi");
    assert_eq!(chat_body(&wire[3]).message, "there");
}

#[tokio::test(start_paused = true)]
async fn saturated_link_stalls_overflow_without_false_acks() {
    let transport = ChannelTransport::new();
    let manager = ConnectionManager::new(transport.clone());
    assert!(manager.initialize("u1").await);
    let mut peer = transport.take_peer().unwrap();

    let acks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&acks);
    manager
        .on(Topic::MessageSent, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    // 70 sends against a 64-slot link: the link fills, the overflow must
    // park in the queue, and only what the link accepted is acknowledged.
    for i in 0..70 {
        assert!(manager.send_chat_message("r1", &format!("m{i}"), ChatKind::Text).await);
    }
    assert_eq!(acks.load(Ordering::SeqCst), 64);

    let mut delivered = Vec::new();
    while let Ok(envelope) = peer.from_client.try_recv() {
        delivered.push(envelope);
    }
    assert_eq!(delivered.len(), 64);
    assert_eq!(chat_body(delivered.last().unwrap()).message, "m63");

    // Draining freed capacity; the next tick flushes the parked tail in
    // order and acknowledges it.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let mut tail = Vec::new();
    while let Ok(envelope) = peer.from_client.try_recv() {
        if envelope.kind == EventKind::Chat {
            tail.push(chat_body(&envelope).message);
        }
    }
    assert_eq!(tail, vec!["m64", "m65", "m66", "m67", "m68", "m69"]);
    assert_eq!(acks.load(Ordering::SeqCst), 70);
}

#[tokio::test(start_paused = true)]
async fn exhausted_backoff_fails_terminally_and_announces_once() {
    let transport = ChannelTransport::new();
    transport.refuse_next(100);
    let manager = ConnectionManager::new(transport.clone());

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    manager
        .on(Topic::ReconnectionFailed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(!manager.initialize("u1").await);

    // Retries land at +1s, +2s, +4s, +8s, +16s; the fifth failure is
    // terminal.
    tokio::time::sleep(Duration::from_secs(40)).await;

    let status = manager.connection_status().await;
    assert_eq!(status.state, SessionState::Failed);
    assert_eq!(status.reconnect_attempts, 5);
    assert_eq!(transport.attempts(), 6);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn refused_initial_dial_recovers_in_the_background() {
    let transport = ChannelTransport::new();
    transport.refuse_next(1);
    let manager = ConnectionManager::new(transport.clone());

    let connects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connects);
    manager
        .on(Topic::Connected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(!manager.initialize("u1").await);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(manager.connection_status().await.connected);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_link_is_dropped_and_redialed() {
    let transport = ChannelTransport::new();
    let manager = ConnectionManager::new(transport.clone());
    assert!(manager.initialize("u1").await);
    let mut peer = transport.take_peer().unwrap();

    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    manager
        .on(Topic::Disconnected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    // Heartbeats flow on the interval.
    tokio::time::sleep(Duration::from_secs(26)).await;
    let beat = peer.from_client.recv().await.unwrap();
    assert_eq!(beat.kind, EventKind::SystemAlert);
    assert!(HeartbeatBody::matches(&beat.data));

    // Total silence past three intervals forces a drop; the backoff path
    // then establishes a fresh link on its own.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    let status = manager.connection_status().await;
    assert!(status.connected);
    assert_eq!(transport.attempts(), 2);
}

struct DenyAll;

impl ModerationService for DenyAll {
    fn review(&self, _text: &str) -> ModerationVerdict {
        ModerationVerdict { approved: false, flags: vec!["blocked".to_string()] }
    }
}

struct RecordingSink {
    seen: Arc<Mutex<Vec<String>>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, envelope: &Envelope) {
        self.seen.lock().unwrap().push(envelope.id.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn collaborators_gate_outbound_and_observe_notifications() {
    let transport = ChannelTransport::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let manager = ConnectionManager::with_parts(
        transport.clone(),
        SystemEnv,
        SessionConfig::default(),
        Arc::new(NoHistory),
        Arc::new(DenyAll),
        Arc::new(RecordingSink { seen: Arc::clone(&seen) }),
    );

    assert!(manager.initialize("u1").await);
    let mut peer = transport.take_peer().unwrap();

    // Moderation refusal: reported to the caller, nothing on the wire.
    assert!(!manager.send_chat_message("r1", "spam", ChatKind::Text).await);
    assert!(peer.from_client.try_recv().is_err());

    let note = Envelope::new(
        "n1",
        EventKind::Notification,
        serde_json::json!({"title": "reminder"}),
        1,
    )
    .with_user("server");
    peer.to_client.send(note).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["n1"]);
}

struct SeededHistory {
    recorded: Arc<Mutex<Vec<String>>>,
}

impl HistoryStore for SeededHistory {
    fn record(&self, envelope: &Envelope) {
        self.recorded.lock().unwrap().push(envelope.id.clone());
    }

    fn recent(&self, room_id: &str) -> Vec<Envelope> {
        if room_id == "r1" {
            vec![inbound_chat("seed", "r1", "welcome back", 5)]
        } else {
            Vec::new()
        }
    }
}

#[tokio::test(start_paused = true)]
async fn history_cache_seeds_on_join_and_serves_windows() {
    let transport = ChannelTransport::new();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let manager = ConnectionManager::with_parts(
        transport.clone(),
        SystemEnv,
        SessionConfig::default(),
        Arc::new(SeededHistory { recorded: Arc::clone(&recorded) }),
        Arc::new(ApproveAll),
        Arc::new(NullNotifier),
    );

    assert!(manager.initialize("u1").await);
    manager.join_room("r1").await;
    let peer = transport.take_peer().unwrap();

    for (id, message, ts) in [("c1", "one", 10), ("c2", "two", 20), ("c3", "three", 30)] {
        peer.to_client.send(inbound_chat(id, "r1", message, ts)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Seeded backlog first, then live traffic; delivered chat is persisted.
    let all = manager.get_message_history("r1", 10, None).await;
    let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["seed", "c1", "c2", "c3"]);
    assert_eq!(*recorded.lock().unwrap(), vec!["c1", "c2", "c3"]);

    // Limit keeps the newest entries; `before` windows by timestamp.
    let newest = manager.get_message_history("r1", 2, None).await;
    assert_eq!(newest[0].id, "c2");
    assert_eq!(newest[1].id, "c3");
    let older = manager.get_message_history("r1", 10, Some(25)).await;
    assert_eq!(older.last().unwrap().id, "c2");

    assert!(manager.get_message_history("r9", 10, None).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn event_updates_are_cached_per_event() {
    let transport = ChannelTransport::new();
    let manager = ConnectionManager::new(transport.clone());
    assert!(manager.initialize("u1").await);
    let peer = transport.take_peer().unwrap();

    for (id, event_id) in [("u1", "e1"), ("u2", "e2"), ("u3", "e1")] {
        let body = EventUpdateBody {
            kind: "new_registration".to_string(),
            payload: serde_json::json!({"attendeeCount": 41}),
        };
        let envelope = Envelope::new(id, EventKind::EventUpdate, to_data(&body).unwrap(), 7)
            .with_event(event_id);
        peer.to_client.send(envelope).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let updates = manager.get_event_updates("e1", 10).await;
    let ids: Vec<&str> = updates.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "u3"]);
    assert_eq!(manager.get_event_updates("e1", 1).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_votes_reconcile_against_server_echo() {
    let transport = ChannelTransport::new();
    let manager = ConnectionManager::new(transport.clone());
    assert!(manager.initialize("u1").await);
    let mut peer = transport.take_peer().unwrap();

    let poll_id = manager.create_poll("e1", "lunch?", &["pizza", "salad"]).await;
    let create = peer.from_client.recv().await.unwrap();
    assert_eq!(create.kind, EventKind::Poll);
    assert_eq!(create.event_id.as_deref(), Some("e1"));

    manager.vote_poll(&poll_id, "opt-0").await;
    assert_eq!(manager.poll_vote_count(&poll_id, "opt-0").await, 1);

    // Authoritative echo carries the real tallies.
    let echo_body = PollBody {
        action: PollActionKind::Vote,
        poll_id: poll_id.clone(),
        question: None,
        options: Some(vec![PollOption {
            id: "opt-0".to_string(),
            text: "pizza".to_string(),
            votes: 4,
        }]),
        option_id: None,
    };
    let echo =
        Envelope::new("echo", EventKind::Poll, to_data(&echo_body).unwrap(), 9).with_room("r1");
    peer.to_client.send(echo).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(manager.poll_vote_count(&poll_id, "opt-0").await, 4);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_timers_and_clears_subscriptions() {
    let transport = ChannelTransport::new();
    let manager = ConnectionManager::new(transport.clone());
    assert!(manager.initialize("u1").await);
    manager.join_room("r1").await;
    let mut peer = transport.take_peer().unwrap();
    peer.from_client.recv().await.unwrap(); // join announcement

    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    manager
        .on(Topic::Message, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    manager.disconnect().await;
    manager.disconnect().await; // idempotent

    let status = manager.connection_status().await;
    assert_eq!(status.state, SessionState::Disconnected);
    assert!(status.rooms.is_empty());

    // No dials, no heartbeats, no deliveries after teardown.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.attempts(), 1);
    assert!(peer.from_client.try_recv().is_err());
    assert_eq!(events.load(Ordering::SeqCst), 0);
}
