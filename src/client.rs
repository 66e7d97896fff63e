//! WebSocket sync client for connecting to the board server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Typed send helpers for every mutation intent
//! - A debounced note editor that coalesces rapid keystrokes
//! - A local board view kept current from server events

use std::collections::HashMap;
use std::sync::Arc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::model::{Activity, Card, CardPatch, Note};
use crate::presence::PresenceUpdate;
use crate::protocol::{
    CardRef, ClientEvent, CreateCard, Hello, ProtocolError, ServerEvent, UpdateCard, UpdateNote,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client to the application.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Another session created a card
    CardCreated(Card),
    /// Another session updated a card
    CardUpdated(Card),
    /// Another session deleted a card
    CardDeleted(Uuid),
    /// Another session replaced the board note
    NoteUpdated(Note),
    /// Our card:create was accepted; payload is the canonical record
    CreateAck(Card),
    /// Our card:update was accepted
    UpdateAck(Card),
    /// Our card:delete was accepted
    DeleteAck(Uuid),
    /// Our note:update was accepted
    NoteAck(Note),
    /// A session entered or left a board we are viewing
    Presence(PresenceUpdate),
    /// Global activity feed entry
    Activity(Activity),
    /// The server rejected one of our intents
    ServerError(String),
}

/// The sync client.
///
/// Manages a WebSocket connection to the board server. Every send helper
/// submits one intent; outcomes arrive asynchronously on the event channel
/// as acks, broadcasts, or errors.
pub struct SyncClient {
    /// Actor bound to this connection via the hello handshake
    user_id: Uuid,
    name: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<ClientEvent>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<BoardEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<BoardEvent>,

    /// Reader task handle, aborted on disconnect
    reader: Option<JoinHandle<()>>,

    /// Server URL
    server_url: String,
}

impl SyncClient {
    /// Create a new sync client.
    pub fn new(user_id: Uuid, name: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            user_id,
            name: name.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            reader: None,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<BoardEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages and
    /// sends the identity handshake as the first frame.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;
        let (ws_stream, _) = match ws_result {
            Ok(ok) => ok,
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: encode and forward outgoing intents
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            use futures_util::SinkExt;
            while let Some(event) = out_rx.recv().await {
                let frame = match event.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("Failed to encode outgoing event: {e}");
                        continue;
                    }
                };
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Text(frame.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Identity must land before any mutation intent
        self.send(ClientEvent::Hello(Hello {
            user_id: self.user_id,
            name: self.name.clone(),
        }))
        .await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(BoardEvent::Connected).await;

        // Reader task: map server events onto the application channel
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        match ServerEvent::decode(&text) {
                            Ok(event) => {
                                let _ = event_tx.send(Self::map_event(event)).await;
                            }
                            Err(e) => {
                                log::warn!("Failed to decode server event: {e}");
                            }
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(BoardEvent::Disconnected).await;
        }));

        Ok(())
    }

    /// Tear the connection down. Dropping both task halves closes the
    /// underlying socket, which the server observes as a disconnect.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    fn map_event(event: ServerEvent) -> BoardEvent {
        match event {
            ServerEvent::CardCreate(card) => BoardEvent::CardCreated(card),
            ServerEvent::CardUpdate(card) => BoardEvent::CardUpdated(card),
            ServerEvent::CardDelete(r) => BoardEvent::CardDeleted(r.id),
            ServerEvent::NoteUpdate(note) => BoardEvent::NoteUpdated(note),
            ServerEvent::CardCreateOk(card) => BoardEvent::CreateAck(card),
            ServerEvent::CardUpdateOk(card) => BoardEvent::UpdateAck(card),
            ServerEvent::CardDeleteOk(r) => BoardEvent::DeleteAck(r.id),
            ServerEvent::NoteUpdateOk(note) => BoardEvent::NoteAck(note),
            ServerEvent::Presence(p) => BoardEvent::Presence(p),
            ServerEvent::ActivityNew(a) => BoardEvent::Activity(a),
            ServerEvent::Error(e) => BoardEvent::ServerError(e.message),
        }
    }

    /// Submit one intent. Fails when not connected.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Outgoing channel handle, for components that submit on our behalf
    /// (e.g. [`NoteSession`]).
    pub fn sender(&self) -> Option<mpsc::Sender<ClientEvent>> {
        self.outgoing_tx.clone()
    }

    // ── Intent helpers ──────────────────────────────────────────────

    pub async fn join_board(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::JoinBoard(board_id)).await
    }

    pub async fn leave_board(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::LeaveBoard(board_id)).await
    }

    pub async fn create_card(&self, req: CreateCard) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CardCreate(req)).await
    }

    pub async fn update_card(&self, id: Uuid, updates: CardPatch) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CardUpdate(UpdateCard { id, updates }))
            .await
    }

    /// Move a card to another column on the same board.
    pub async fn move_card(&self, id: Uuid, column_id: Uuid) -> Result<(), ProtocolError> {
        self.update_card(id, CardPatch::move_to(column_id)).await
    }

    pub async fn delete_card(&self, id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CardDelete(CardRef { id })).await
    }

    /// Submit a note replacement immediately, bypassing debounce.
    pub async fn update_note(
        &self,
        board_id: Uuid,
        content: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::NoteUpdate(UpdateNote {
            board_id,
            content: content.into(),
        }))
        .await
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
    }
}

/// How long the note editor must be idle before a flush.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(1000);

/// Debounce state machine for the shared note editor.
///
/// Pure state: callers pass the current instant into [`edit`](Self::edit)
/// and [`poll`](Self::poll), which makes the timing law directly testable.
/// Every edit restarts the idle window, so a burst of keystrokes produces
/// exactly one `note:update` carrying the final text, sent one idle window
/// after the last keystroke.
///
/// While an edit is unflushed or unacknowledged the local buffer wins:
/// remote replacements are dropped rather than merged. Concurrent editors
/// can therefore lose keystrokes to each other; the note is a
/// whole-content replacement surface, not a merged document.
#[derive(Debug)]
pub struct NoteDebouncer {
    board_id: Uuid,
    content: String,
    /// Local edits not yet acknowledged by the server.
    dirty: bool,
    /// Pending flush instant; None when nothing is scheduled.
    deadline: Option<Instant>,
    idle_window: Duration,
}

impl NoteDebouncer {
    pub fn new(board_id: Uuid) -> Self {
        Self::with_window(board_id, DEFAULT_IDLE_WINDOW)
    }

    pub fn with_window(board_id: Uuid, idle_window: Duration) -> Self {
        Self {
            board_id,
            content: String::new(),
            dirty: false,
            deadline: None,
            idle_window,
        }
    }

    /// Record a keystroke at `now`, restarting the idle window. Returns the
    /// new flush deadline.
    pub fn edit(&mut self, text: impl Into<String>, now: Instant) -> Instant {
        self.content = text.into();
        self.dirty = true;
        let deadline = now + self.idle_window;
        self.deadline = Some(deadline);
        deadline
    }

    /// Flush if the idle window has elapsed. Returns the payload to submit,
    /// or None when no flush is due. The buffer stays dirty until the
    /// server acknowledges.
    pub fn poll(&mut self, now: Instant) -> Option<UpdateNote> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        Some(UpdateNote {
            board_id: self.board_id,
            content: self.content.clone(),
        })
    }

    /// Server acknowledged our last flush. Clears dirty unless the buffer
    /// was re-edited while the flush was in flight.
    pub fn acknowledge(&mut self) {
        if self.deadline.is_none() {
            self.dirty = false;
        }
    }

    /// Apply a remote replacement. Dropped (returns false) while local
    /// edits are unflushed or unacknowledged.
    pub fn apply_remote(&mut self, note: &Note) -> bool {
        if self.dirty {
            return false;
        }
        self.content = note.content.clone();
        true
    }

    pub fn value(&self) -> &str {
        &self.content
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }
}

/// Async wrapper wiring a [`NoteDebouncer`] to the client's outgoing
/// channel. Each edit cancels the previously scheduled flush task and
/// schedules a new one at the restarted deadline.
pub struct NoteSession {
    debouncer: Arc<Mutex<NoteDebouncer>>,
    outgoing: mpsc::Sender<ClientEvent>,
    flush: Option<JoinHandle<()>>,
}

impl NoteSession {
    pub fn new(board_id: Uuid, outgoing: mpsc::Sender<ClientEvent>) -> Self {
        Self::with_window(board_id, DEFAULT_IDLE_WINDOW, outgoing)
    }

    pub fn with_window(
        board_id: Uuid,
        idle_window: Duration,
        outgoing: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            debouncer: Arc::new(Mutex::new(NoteDebouncer::with_window(board_id, idle_window))),
            outgoing,
            flush: None,
        }
    }

    /// Record a keystroke and (re)schedule the flush.
    pub async fn edit(&mut self, text: impl Into<String>) {
        let deadline = {
            let mut debouncer = self.debouncer.lock().await;
            debouncer.edit(text, Instant::now())
        };

        if let Some(handle) = self.flush.take() {
            handle.abort();
        }

        let debouncer = self.debouncer.clone();
        let outgoing = self.outgoing.clone();
        self.flush = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let flushed = debouncer.lock().await.poll(Instant::now());
            if let Some(req) = flushed {
                let _ = outgoing.send(ClientEvent::NoteUpdate(req)).await;
            }
        }));
    }

    /// Feed the server's note:update:ok back in.
    pub async fn handle_ack(&self) {
        self.debouncer.lock().await.acknowledge();
    }

    /// Feed a remote note:update broadcast in. Returns whether it was
    /// applied (false while our own edit is pending).
    pub async fn handle_remote(&self, note: &Note) -> bool {
        self.debouncer.lock().await.apply_remote(note)
    }

    pub async fn value(&self) -> String {
        self.debouncer.lock().await.value().to_string()
    }

    pub async fn is_dirty(&self) -> bool {
        self.debouncer.lock().await.is_dirty()
    }
}

impl Drop for NoteSession {
    fn drop(&mut self) {
        if let Some(handle) = self.flush.take() {
            handle.abort();
        }
    }
}

/// Local materialized view of one board's cards, kept current by feeding
/// it every [`BoardEvent`].
///
/// Acks and broadcasts both carry the canonical post-mutation record, so
/// both are applied the same way. A delete for an unknown card is ignored
/// (it may race our own delete); an update for an unknown card upserts.
#[derive(Debug, Default)]
pub struct BoardView {
    board_id: Uuid,
    cards: HashMap<Uuid, Card>,
}

impl BoardView {
    pub fn new(board_id: Uuid) -> Self {
        Self {
            board_id,
            cards: HashMap::new(),
        }
    }

    /// Seed from an initial card load.
    pub fn load(&mut self, cards: Vec<Card>) {
        self.cards = cards.into_iter().map(|c| (c.id, c)).collect();
    }

    /// Apply one event. Events for other boards are ignored.
    pub fn apply(&mut self, event: &BoardEvent) {
        match event {
            BoardEvent::CardCreated(card)
            | BoardEvent::CardUpdated(card)
            | BoardEvent::CreateAck(card)
            | BoardEvent::UpdateAck(card) => {
                if card.board_id == self.board_id {
                    self.cards.insert(card.id, card.clone());
                }
            }
            BoardEvent::CardDeleted(id) | BoardEvent::DeleteAck(id) => {
                self.cards.remove(id);
            }
            _ => {}
        }
    }

    pub fn card(&self, id: Uuid) -> Option<&Card> {
        self.cards.get(&id)
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    /// Cards in one column, in board order.
    pub fn cards_in(&self, column_id: Uuid) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self
            .cards
            .values()
            .filter(|c| c.column_id == column_id)
            .collect();
        cards.sort_by_key(|c| c.sort_key());
        cards
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }
}
