//! Integration tests for end-to-end WebSocket board sync.
//!
//! These tests start a real server and connect real clients,
//! verifying the full mutation pipeline: persist, ack, broadcast,
//! presence, and the global activity feed.

use flowboard_collab::client::{BoardEvent, ConnectionState, NoteSession, SyncClient};
use flowboard_collab::model::Board;
use flowboard_collab::protocol::CreateCard;
use flowboard_collab::server::{ServerConfig, SyncServer};
use flowboard_collab::store::BoardStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port with one seeded board. Returns the
/// server URL and the board.
async fn start_test_server() -> (String, Board) {
    let port = free_port().await;
    let store = Arc::new(BoardStore::new());
    let board = store
        .create_board(Board::new("Sprint", Uuid::new_v4()))
        .await
        .unwrap();

    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        channel_capacity: 64,
    };
    let server = SyncServer::with_store(config, store);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("ws://127.0.0.1:{port}"), board)
}

/// Connect a named client and wait for its Connected event.
async fn connect_client(name: &str, url: &str) -> (SyncClient, mpsc::Receiver<BoardEvent>) {
    let mut client = SyncClient::new(Uuid::new_v4(), name, url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    wait_for(&mut events, |e| matches!(e, BoardEvent::Connected)).await;
    (client, events)
}

/// Receive events until one matches, panicking on timeout. Non-matching
/// events (presence, activity) are skipped.
async fn wait_for<F>(rx: &mut mpsc::Receiver<BoardEvent>, mut pred: F) -> BoardEvent
where
    F: FnMut(&BoardEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Assert no matching event arrives within a short window.
async fn assert_no_event<F>(rx: &mut mpsc::Receiver<BoardEvent>, mut pred: F)
where
    F: FnMut(&BoardEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    loop {
        match timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Some(event)) => {
                assert!(!pred(&event), "unexpected event: {event:?}");
            }
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return;
        }
    }
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (url, _board) = start_test_server().await;

    // Connect raw WebSocket
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_client_connects() {
    let (url, _board) = start_test_server().await;

    let (client, _events) = connect_client("Alice", &url).await;
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_create_card_ack_and_broadcast() {
    let (url, board) = start_test_server().await;
    let to_do = board.columns[0].id;

    let (alice, mut alice_events) = connect_client("Alice", &url).await;
    let (bob, mut bob_events) = connect_client("Bob", &url).await;
    alice.join_board(board.id).await.unwrap();
    bob.join_board(board.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice
        .create_card(CreateCard::new(board.id, to_do, "Buy milk"))
        .await
        .unwrap();

    // Alice gets the ack with the canonical record
    let ack = wait_for(&mut alice_events, |e| matches!(e, BoardEvent::CreateAck(_))).await;
    let acked = match ack {
        BoardEvent::CreateAck(card) => card,
        _ => unreachable!(),
    };
    assert_eq!(acked.title, "Buy milk");
    assert_eq!(acked.column_id, to_do);

    // Bob gets the broadcast with the identical record
    let broadcast =
        wait_for(&mut bob_events, |e| matches!(e, BoardEvent::CardCreated(_))).await;
    match broadcast {
        BoardEvent::CardCreated(card) => assert_eq!(card, acked),
        _ => unreachable!(),
    }

    // Alice never sees her own mutation as a broadcast
    assert_no_event(&mut alice_events, |e| {
        matches!(e, BoardEvent::CardCreated(_))
    })
    .await;
}

#[tokio::test]
async fn test_activity_reaches_sessions_outside_the_room() {
    let (url, board) = start_test_server().await;

    let (alice, _alice_events) = connect_client("Alice", &url).await;
    alice.join_board(board.id).await.unwrap();

    // Carol is connected but never joins any board
    let (_carol, mut carol_events) = connect_client("Carol", &url).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice
        .create_card(CreateCard::new(board.id, board.columns[0].id, "Buy milk"))
        .await
        .unwrap();

    let event = wait_for(&mut carol_events, |e| matches!(e, BoardEvent::Activity(_))).await;
    match event {
        BoardEvent::Activity(activity) => {
            assert_eq!(activity.action, "created card \"Buy milk\"");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_presence_join_and_leave() {
    let (url, board) = start_test_server().await;

    let (alice, mut alice_events) = connect_client("Alice", &url).await;
    alice.join_board(board.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (bob, mut bob_events) = connect_client("Bob", &url).await;
    bob.join_board(board.id).await.unwrap();

    // Alice is notified of Bob's arrival; Bob hears nothing about himself
    let event = wait_for(&mut alice_events, |e| matches!(e, BoardEvent::Presence(_))).await;
    let bob_session = match event {
        BoardEvent::Presence(p) => {
            assert_eq!(p.event, flowboard_collab::presence::PresenceEventKind::Join);
            p.session_id
        }
        _ => unreachable!(),
    };
    assert_no_event(&mut bob_events, |e| matches!(e, BoardEvent::Presence(_))).await;

    bob.leave_board(board.id).await.unwrap();
    let event = wait_for(&mut alice_events, |e| matches!(e, BoardEvent::Presence(_))).await;
    match event {
        BoardEvent::Presence(p) => {
            assert_eq!(p.session_id, bob_session);
            assert_eq!(p.event, flowboard_collab::presence::PresenceEventKind::Leave);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_cross_board_move_rejected() {
    let (url, board) = start_test_server().await;
    let foreign = Board::new("Other", Uuid::new_v4());
    let foreign_column = foreign.columns[0].id;

    let (alice, mut alice_events) = connect_client("Alice", &url).await;
    let (bob, mut bob_events) = connect_client("Bob", &url).await;
    alice.join_board(board.id).await.unwrap();
    bob.join_board(board.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice
        .create_card(CreateCard::new(board.id, board.columns[0].id, "Stays"))
        .await
        .unwrap();
    let ack = wait_for(&mut alice_events, |e| matches!(e, BoardEvent::CreateAck(_))).await;
    let card = match ack {
        BoardEvent::CreateAck(card) => card,
        _ => unreachable!(),
    };

    alice.move_card(card.id, foreign_column).await.unwrap();

    let event = wait_for(&mut alice_events, |e| matches!(e, BoardEvent::ServerError(_))).await;
    match event {
        BoardEvent::ServerError(msg) => assert!(msg.contains("column")),
        _ => unreachable!(),
    }
    // Nobody else hears about the rejected mutation
    assert_no_event(&mut bob_events, |e| matches!(e, BoardEvent::CardUpdated(_))).await;
}

#[tokio::test]
async fn test_note_debounce_end_to_end() {
    let (url, board) = start_test_server().await;

    let (alice, mut alice_events) = connect_client("Alice", &url).await;
    let (bob, mut bob_events) = connect_client("Bob", &url).await;
    alice.join_board(board.id).await.unwrap();
    bob.join_board(board.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Short idle window so the test stays fast
    let mut session = NoteSession::with_window(
        board.id,
        Duration::from_millis(50),
        alice.sender().unwrap(),
    );
    session.edit("# Sprint").await;
    session.edit("# Sprint goals").await;

    // One coalesced note:update reaches Bob with the final text
    let event = wait_for(&mut bob_events, |e| matches!(e, BoardEvent::NoteUpdated(_))).await;
    match event {
        BoardEvent::NoteUpdated(note) => {
            assert_eq!(note.content, "# Sprint goals");
            assert_eq!(note.board_id, board.id);
        }
        _ => unreachable!(),
    }
    assert_no_event(&mut bob_events, |e| matches!(e, BoardEvent::NoteUpdated(_))).await;

    // Alice's ack clears her dirty flag
    wait_for(&mut alice_events, |e| matches!(e, BoardEvent::NoteAck(_))).await;
    session.handle_ack().await;
    assert!(!session.is_dirty().await);
}

#[tokio::test]
async fn test_vanished_peer_releases_membership() {
    use flowboard_collab::protocol::ClientEvent;
    use futures_util::SinkExt;

    let port = free_port().await;
    let store = Arc::new(BoardStore::new());
    let board = store
        .create_board(Board::new("Sprint", Uuid::new_v4()))
        .await
        .unwrap();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        channel_capacity: 4,
    };
    let server = Arc::new(SyncServer::with_store(config, store));
    let registry = server.registry().clone();
    {
        let server = server.clone();
        tokio::spawn(async move {
            server.run().await.unwrap();
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    let url = format!("ws://127.0.0.1:{port}");

    let (alice, mut _alice_events) = connect_client("Alice", &url).await;
    alice.join_board(board.id).await.unwrap();

    // A raw socket that joins the room, then vanishes without a close
    // handshake while broadcasts are still being queued at it
    let (mut raw, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    raw.send(tokio_tungstenite::tungstenite::Message::Text(
        ClientEvent::JoinBoard(board.id).encode().unwrap().into(),
    ))
    .await
    .unwrap();
    for _ in 0..50 {
        if registry.member_count(board.id).await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(registry.member_count(board.id).await, 2);
    drop(raw);

    // Keep frames flowing at the dead peer; whichever half of the
    // connection loop observes the failure, cleanup must run
    for _ in 0..50 {
        let _ = alice
            .create_card(CreateCard::new(board.id, board.columns[0].id, "noise"))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        if registry.member_count(board.id).await == 1 {
            break;
        }
    }

    // No leaked membership, channel entry, or room slot for the dead peer
    assert_eq!(registry.member_count(board.id).await, 1);
    assert_eq!(registry.session_count().await, 1);
}

#[tokio::test]
async fn test_disconnect_broadcasts_presence_leave() {
    let (url, board) = start_test_server().await;

    let (alice, mut alice_events) = connect_client("Alice", &url).await;
    alice.join_board(board.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (bob, mut _bob_events) = connect_client("Bob", &url).await;
    bob.join_board(board.id).await.unwrap();
    wait_for(&mut alice_events, |e| matches!(e, BoardEvent::Presence(_))).await;

    // Dropping the client closes the socket; the server must emit a leave
    drop(bob);
    let event = wait_for(&mut alice_events, |e| matches!(e, BoardEvent::Presence(_))).await;
    match event {
        BoardEvent::Presence(p) => {
            assert_eq!(p.event, flowboard_collab::presence::PresenceEventKind::Leave);
        }
        _ => unreachable!(),
    }
}
