//! WebSocket Chat Tests
//!
//! End-to-end room behaviour against a live server.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use pretty_assertions::assert_eq;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use chat_hub::infrastructure::repositories::InMemoryMessageRepository;

use crate::common::{
    assert_silent, mint_token, next_message, send_text, stored, test_settings, TestApp,
};

const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_message_reaches_every_member_including_sender() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(42, "alice").await;
    let mut bob = app.connect(42, "bob").await;
    app.wait_for_members(42, 2).await;

    send_text(&mut alice, "hi").await;

    let to_alice = next_message(&mut alice).await;
    let to_bob = next_message(&mut bob).await;
    assert_eq!(to_alice, to_bob);
    assert_eq!(to_bob.chat_id, 42);
    assert_eq!(to_bob.sender_id, "alice");
    assert_eq!(to_bob.content, "hi");
    assert_eq!(app.store.count(42), 1);
}

#[tokio::test]
async fn test_departed_member_receives_nothing_further() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(42, "alice").await;
    let mut bob = app.connect(42, "bob").await;
    app.wait_for_members(42, 2).await;

    bob.close(None).await.unwrap();
    app.wait_for_members(42, 1).await;

    send_text(&mut alice, "still here?").await;

    let echoed = next_message(&mut alice).await;
    assert_eq!(echoed.content, "still here?");
    assert_eq!(app.hub.snapshot().await.unwrap().clients, 1);
}

#[tokio::test]
async fn test_history_replayed_oldest_first_without_duplicates() {
    let store = Arc::new(InMemoryMessageRepository::new());
    store.seed(stored(1, 7, "carol", "first", 30));
    store.seed(stored(2, 7, "dave", "second", 20));
    store.seed(stored(3, 7, "carol", "third", 10));
    let app = TestApp::spawn_with(test_settings(), store).await;

    let mut erin = app.connect(7, "erin").await;

    let replayed: Vec<_> = vec![
        next_message(&mut erin).await,
        next_message(&mut erin).await,
        next_message(&mut erin).await,
    ];
    let ids: Vec<_> = replayed.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(replayed[0].content, "first");

    send_text(&mut erin, "live").await;
    let live = next_message(&mut erin).await;
    assert_eq!(live.id, 4);
    assert_eq!(live.content, "live");
    assert_silent(&mut erin, QUIET).await;
}

#[tokio::test]
async fn test_history_is_capped_to_most_recent() {
    let mut settings = test_settings();
    settings.websocket.history_limit = 2;
    let store = Arc::new(InMemoryMessageRepository::new());
    for id in 1..=5 {
        store.seed(stored(id, 8, "carol", &format!("m{}", id), 60 - id));
    }
    let app = TestApp::spawn_with(settings, store).await;

    let mut erin = app.connect(8, "erin").await;

    assert_eq!(next_message(&mut erin).await.id, 4);
    assert_eq!(next_message(&mut erin).await.id, 5);
    assert_silent(&mut erin, QUIET).await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(42, "alice").await;
    app.wait_for_members(42, 1).await;

    alice
        .send(WsMessage::text("hello from user1"))
        .await
        .unwrap();
    send_text(&mut alice, "   ").await;
    send_text(&mut alice, "valid").await;

    let received = next_message(&mut alice).await;
    assert_eq!(received.content, "valid");
    assert_eq!(app.store.count(42), 1);
}

#[tokio::test]
async fn test_client_cannot_choose_room_or_sender() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(42, "alice").await;
    let mut watcher = app.connect(99, "watcher").await;
    app.wait_for_members(42, 1).await;
    app.wait_for_members(99, 1).await;

    let spoofed = r#"{"content":"sneaky","chat_id":99,"sender_id":"mallory"}"#;
    alice.send(WsMessage::text(spoofed)).await.unwrap();

    let received = next_message(&mut alice).await;
    assert_eq!(received.chat_id, 42);
    assert_eq!(received.sender_id, "alice");
    assert_silent(&mut watcher, QUIET).await;
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(1, "alice").await;
    let mut bob = app.connect(2, "bob").await;
    app.wait_for_members(1, 1).await;
    app.wait_for_members(2, 1).await;

    send_text(&mut alice, "room one").await;
    send_text(&mut bob, "room two").await;

    assert_eq!(next_message(&mut alice).await.content, "room one");
    assert_eq!(next_message(&mut bob).await.content, "room two");
    assert_silent(&mut alice, QUIET).await;
    assert_silent(&mut bob, QUIET).await;
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(5, "alice").await;
    let mut bob = app.connect(5, "bob").await;
    app.wait_for_members(5, 2).await;

    for i in 0..10 {
        send_text(&mut alice, &format!("msg-{}", i)).await;
    }

    for i in 0..10 {
        assert_eq!(next_message(&mut bob).await.content, format!("msg-{}", i));
    }
}

#[tokio::test]
async fn test_upgrade_without_token_is_rejected() {
    let app = TestApp::spawn().await;
    let url = format!("ws://{}/ws/chats/42", app.addr);

    let err = connect_async(url).await.expect_err("handshake should fail");

    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP 401, got {:?}", other),
    }
    assert_eq!(app.hub.snapshot().await.unwrap().clients, 0);
}

#[tokio::test]
async fn test_upgrade_with_bad_signature_is_rejected() {
    let app = TestApp::spawn().await;
    let mut token = mint_token("alice");
    token.push('x');

    let err = connect_async(app.ws_url(42, &token))
        .await
        .expect_err("handshake should fail");

    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(ref response) if response.status() == 401
    ));
}

#[tokio::test]
async fn test_silent_peer_is_dropped_after_read_deadline() {
    let mut settings = test_settings();
    settings.websocket.pong_wait_ms = 300;
    settings.websocket.ping_period_ms = 200;
    let app = TestApp::spawn_with(settings, Arc::new(InMemoryMessageRepository::new())).await;

    // Never polled, so pings go unanswered.
    let _idle = app.connect(3, "idle").await;
    app.wait_for_members(3, 1).await;

    app.wait_for_members(3, 0).await;
    assert!(app.hub.snapshot().await.unwrap().rooms.is_empty());
}

#[tokio::test]
async fn test_hub_shutdown_closes_connections() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(42, "alice").await;
    app.wait_for_members(42, 1).await;

    app.hub.shutdown();

    let frame = tokio::time::timeout(crate::common::WAIT, futures::StreamExt::next(&mut alice))
        .await
        .expect("connection was not closed");
    assert!(matches!(frame, Some(Ok(WsMessage::Close(_))) | None));
}
