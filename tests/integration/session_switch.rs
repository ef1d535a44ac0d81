//! Integration tests for conversation switching.
//!
//! Covers the single-active-channel guarantee, unread clearing on switch,
//! and the full select-peer → hydrate → send → echo flow.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use duochat::chat::history::StaticHistory;
use duochat::chat::{ConversationSession, SessionEvent};
use duochat::notify::{NotificationTracker, NotifyConfig};
use duochat::transport::loopback::{AcceptedChannel, LoopbackDialer};
use duochat::transport::{Channel, ChannelState};
use duochat_proto::identity::UserId;
use duochat_proto::message::{ContentKind, Message};

type TestSession = ConversationSession<LoopbackDialer, StaticHistory>;

struct Harness {
    session: TestSession,
    accept_rx: mpsc::UnboundedReceiver<AcceptedChannel>,
    history: Arc<StaticHistory>,
    tracker: Arc<NotificationTracker<LoopbackDialer>>,
}

fn harness(local: &str) -> Harness {
    let (dialer, accept_rx) = LoopbackDialer::new(32);
    let history = Arc::new(StaticHistory::new());
    let (tracker, _events) =
        NotificationTracker::new(UserId::new(local), dialer.clone(), NotifyConfig::default());
    let session = ConversationSession::new(
        UserId::new(local),
        dialer,
        Arc::clone(&history),
        Arc::clone(&tracker),
    );
    Harness {
        session,
        accept_rx,
        history,
        tracker,
    }
}

async fn next_event(session: &mut TestSession) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("no session event within timeout")
}

#[tokio::test]
async fn at_most_one_channel_open_after_any_switch_sequence() {
    let mut h = harness("alice");
    let peers = ["bob", "carol", "dave", "bob", "erin"];

    let mut handles = Vec::new();
    for peer in peers {
        h.session.start_chat(UserId::new(peer)).await.unwrap();
        handles.push(h.accept_rx.recv().await.unwrap());
    }

    let open: Vec<_> = handles
        .iter()
        .filter(|accepted| accepted.client_state.get() == ChannelState::Open)
        .collect();
    assert_eq!(open.len(), 1, "exactly one chat channel may be Open");
    assert_eq!(open[0].peer, Some(UserId::new("erin")));

    // Every superseded channel reached its terminal state.
    for accepted in &handles[..handles.len() - 1] {
        assert_eq!(accepted.client_state.get(), ChannelState::Closed);
    }
}

#[tokio::test]
async fn switching_closes_the_previous_channel_for_its_remote() {
    let mut h = harness("alice");
    h.session.start_chat(UserId::new("bob")).await.unwrap();
    let first = h.accept_rx.recv().await.unwrap();

    h.session.start_chat(UserId::new("carol")).await.unwrap();
    let _second = h.accept_rx.recv().await.unwrap();

    // The remote of the first conversation observes the close.
    let result = tokio::time::timeout(Duration::from_secs(5), first.channel.recv())
        .await
        .expect("remote never observed the close");
    assert!(result.is_err());
}

#[tokio::test]
async fn start_chat_zeroes_unread_regardless_of_prior_traffic() {
    let mut h = harness("alice");
    for _ in 0..5 {
        h.tracker.on_notification(UserId::new("bob"));
    }
    assert_eq!(h.tracker.get_count(&UserId::new("bob")), 5);

    h.session.start_chat(UserId::new("bob")).await.unwrap();
    assert_eq!(h.tracker.get_count(&UserId::new("bob")), 0);
}

#[tokio::test]
async fn switching_to_a_peer_with_notifications_clears_only_that_peer() {
    let mut h = harness("alice");
    h.tracker.on_notification(UserId::new("bob"));
    h.tracker.on_notification(UserId::new("dave"));
    h.tracker.on_notification(UserId::new("dave"));

    h.session.start_chat(UserId::new("dave")).await.unwrap();

    assert_eq!(h.tracker.get_count(&UserId::new("dave")), 0);
    assert_eq!(h.tracker.get_count(&UserId::new("bob")), 1);
}

#[tokio::test]
async fn select_hydrate_send_echo_round_trip() {
    let mut h = harness("alice");
    h.history.put(
        UserId::new("bob"),
        vec![Message {
            sender: UserId::new("bob"),
            receiver: UserId::new("alice"),
            body: "hi".into(),
            kind: ContentKind::Text,
            timestamp: duochat_proto::message::parse_timestamp("2024-05-01 10:00:00").unwrap(),
        }],
    );

    h.session.start_chat(UserId::new("bob")).await.unwrap();
    let server_end = h.accept_rx.recv().await.unwrap();

    // History hydrates first.
    assert_eq!(
        next_event(&mut h.session).await,
        SessionEvent::HistoryLoaded {
            peer: UserId::new("bob"),
            count: 1
        }
    );
    assert_eq!(h.session.view().len(), 1);
    assert_eq!(h.session.view()[0].body, "hi");

    // Sending produces the bare outbound payload.
    h.session
        .send_message("hello", ContentKind::Text)
        .await
        .unwrap();
    let frame = server_end.channel.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["sender"], "alice");
    assert_eq!(value["receiver"], "bob");
    assert_eq!(value["message"], "hello");
    assert_eq!(value["content_type"], "text");

    // The view only grows once the server reflects the frame back.
    assert_eq!(h.session.view().len(), 1);
    server_end
        .channel
        .send(r#"{"type":"chat","sender":"alice","receiver":"bob","message":"hello","content_type":"text","timestamp":"2024-05-01 10:00:05"}"#)
        .await
        .unwrap();
    match next_event(&mut h.session).await {
        SessionEvent::Message(msg) => {
            assert_eq!(msg.sender, UserId::new("alice"));
            assert_eq!(msg.body, "hello");
        }
        other => panic!("expected Message event, got {other:?}"),
    }
    assert_eq!(h.session.view().len(), 2);
}

#[tokio::test]
async fn each_switch_starts_from_an_empty_view() {
    let mut h = harness("alice");
    h.session.start_chat(UserId::new("bob")).await.unwrap();
    let server_end = h.accept_rx.recv().await.unwrap();
    next_event(&mut h.session).await; // empty history

    server_end
        .channel
        .send(r#"{"sender":"bob","receiver":"alice","message":"one"}"#)
        .await
        .unwrap();
    next_event(&mut h.session).await;
    assert_eq!(h.session.view().len(), 1);

    h.session.start_chat(UserId::new("carol")).await.unwrap();
    assert!(h.session.view().is_empty());
}

#[tokio::test]
async fn sends_fail_fast_while_disconnected_and_recover_on_restart() {
    let mut h = harness("alice");
    h.session.start_chat(UserId::new("bob")).await.unwrap();
    let server_end = h.accept_rx.recv().await.unwrap();
    next_event(&mut h.session).await; // history

    server_end.channel.close().await;
    assert_eq!(next_event(&mut h.session).await, SessionEvent::Disconnected);
    assert!(h.session.send_message("hi", ContentKind::Text).await.is_err());

    // Re-triggering the switch restores the conversation.
    h.session.start_chat(UserId::new("bob")).await.unwrap();
    let reopened = h.accept_rx.recv().await.unwrap();
    h.session
        .send_message("back", ContentKind::Text)
        .await
        .unwrap();
    let frame = reopened.channel.recv().await.unwrap();
    assert!(frame.contains("\"back\""));
}
