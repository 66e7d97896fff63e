//! Mutation relay: the single authority that turns a client-submitted
//! mutation intent into a durable state change, a direct acknowledgment to
//! the submitter, a broadcast to the rest of the room, and an activity
//! record.
//!
//! ```text
//! Session S1 ── intent ──► MutationRelay ──► BoardStore (persist)
//!                               │
//!                               ├──► S1          direct `:ok` ack
//!                               ├──► room \ S1   canonical broadcast
//!                               └──► everyone    activity:new
//! ```
//!
//! Intents are processed in transport arrival order per connection and
//! never coalesced server-side. Handlers suspend at each store call and
//! each broadcast, so two intents against the same card can interleave
//! their persistence round-trips — concurrent updates resolve by
//! last-write-wins, with the later arrival overwriting exactly the fields
//! present in its payload.
//!
//! Every error is caught at the handler boundary and converted into a
//! submitter-directed `error` event. Errors never crash the connection and
//! never partially broadcast inconsistent state to other room members.

use std::sync::Arc;
use uuid::Uuid;

use crate::activity::ActivityLogger;
use crate::model::{Card, EntityType};
use crate::protocol::{ClientEvent, CreateCard, ServerEvent, UpdateCard, UpdateNote};
use crate::registry::RoomRegistry;
use crate::store::{BoardStore, StoreError};

/// Per-connection context: the transport session plus the actor bound to
/// it by the `hello` handshake (nil until then).
#[derive(Debug, Clone, Copy)]
pub struct SessionCtx {
    pub session_id: Uuid,
    pub user_id: Uuid,
}

impl SessionCtx {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            user_id: Uuid::nil(),
        }
    }
}

/// Mutation handler errors, reported to the submitter only.
#[derive(Debug)]
pub enum RelayError {
    /// Malformed intent: missing title, invalid board/column reference.
    Validation(String),
    /// The referenced record does not exist. Non-fatal.
    NotFound(String),
    /// The storage layer is unavailable or rejected the write.
    Persistence(StoreError),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::Persistence(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Unavailable => Self::Persistence(StoreError::Unavailable),
        }
    }
}

/// The mutation relay.
pub struct MutationRelay {
    store: Arc<BoardStore>,
    registry: Arc<RoomRegistry>,
    activity: ActivityLogger,
}

impl MutationRelay {
    pub fn new(store: Arc<BoardStore>, registry: Arc<RoomRegistry>) -> Self {
        let activity = ActivityLogger::new(store.clone(), registry.clone());
        Self {
            store,
            registry,
            activity,
        }
    }

    pub fn store(&self) -> &Arc<BoardStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Dispatch one inbound event. Any handler error becomes a
    /// submitter-only `error` event here.
    pub async fn handle(&self, ctx: &SessionCtx, event: ClientEvent) {
        let result = match event {
            // Identity binding happens at the connection layer
            ClientEvent::Hello(_) => Ok(()),
            ClientEvent::JoinBoard(board_id) => {
                self.join_board(ctx, board_id).await;
                Ok(())
            }
            ClientEvent::LeaveBoard(board_id) => {
                self.leave_board(ctx, board_id).await;
                Ok(())
            }
            ClientEvent::CardCreate(req) => self.create_card(ctx, req).await,
            ClientEvent::CardUpdate(req) => self.update_card(ctx, req).await,
            ClientEvent::CardDelete(req) => self.delete_card(ctx, req.id).await,
            ClientEvent::NoteUpdate(req) => self.update_note(ctx, req).await,
        };

        if let Err(err) = result {
            match &err {
                RelayError::Persistence(e) => {
                    log::error!("session {}: persistence failure: {e}", ctx.session_id)
                }
                other => log::debug!("session {}: rejected intent: {other}", ctx.session_id),
            }
            let _ = self
                .registry
                .send(ctx.session_id, &ServerEvent::error(err.to_string()))
                .await;
        }
    }

    /// Join the board's room. Idempotent; at most one presence "join" goes
    /// out per actual join, and never to the joining session itself.
    pub async fn join_board(&self, ctx: &SessionCtx, board_id: Uuid) {
        let newly = self.registry.join(ctx.session_id, board_id).await;
        if newly {
            log::info!("session {} joined board {board_id}", ctx.session_id);
            let _ = self
                .registry
                .broadcast(
                    board_id,
                    &ServerEvent::Presence(crate::presence::PresenceUpdate::join(ctx.session_id)),
                    Some(ctx.session_id),
                )
                .await;
        }
    }

    /// Leave the board's room, notifying the remaining members.
    pub async fn leave_board(&self, ctx: &SessionCtx, board_id: Uuid) {
        let was_member = self.registry.leave(ctx.session_id, board_id).await;
        if was_member {
            log::info!("session {} left board {board_id}", ctx.session_id);
            let _ = self
                .registry
                .broadcast(
                    board_id,
                    &ServerEvent::Presence(crate::presence::PresenceUpdate::leave(ctx.session_id)),
                    Some(ctx.session_id),
                )
                .await;
        }
    }

    /// Implicit cleanup on transport disconnect: leave every joined room.
    /// Any mutation the session already submitted runs to completion.
    pub async fn disconnect(&self, ctx: &SessionCtx) {
        let rooms = self.registry.drop_session(ctx.session_id).await;
        for board_id in rooms {
            let _ = self
                .registry
                .broadcast(
                    board_id,
                    &ServerEvent::Presence(crate::presence::PresenceUpdate::leave(ctx.session_id)),
                    None,
                )
                .await;
        }
    }

    async fn create_card(&self, ctx: &SessionCtx, req: CreateCard) -> Result<(), RelayError> {
        if req.title.trim().is_empty() {
            return Err(RelayError::Validation("card title is required".into()));
        }

        let board = match self.store.board(req.board_id).await {
            Ok(board) => board,
            Err(StoreError::NotFound(_)) => {
                return Err(RelayError::Validation("invalid board reference".into()))
            }
            Err(e) => return Err(RelayError::Persistence(e)),
        };
        if !board.has_column(req.column_id) {
            return Err(RelayError::Validation(
                "column does not belong to board".into(),
            ));
        }

        let mut card = Card::new(req.board_id, req.column_id, req.title, ctx.user_id);
        card.description = req.description;
        card.assignee_id = req.assignee_id;
        card.due_date = req.due_date;
        card.tags = req.tags;

        let card = self.store.insert_card(card).await?;

        let _ = self
            .registry
            .broadcast(
                card.board_id,
                &ServerEvent::CardCreate(card.clone()),
                Some(ctx.session_id),
            )
            .await;
        let _ = self
            .registry
            .send(ctx.session_id, &ServerEvent::CardCreateOk(card.clone()))
            .await;

        self.activity
            .record(
                ctx.user_id,
                format!("created card \"{}\"", card.title),
                EntityType::Card,
                Some(card.id),
                Some(card.board_id),
            )
            .await;
        Ok(())
    }

    async fn update_card(&self, ctx: &SessionCtx, req: UpdateCard) -> Result<(), RelayError> {
        let existing = self.store.card(req.id).await?;

        // A column move must stay within the card's own board: cross-board
        // moves are rejected as invalid input, not silently corrected.
        if let Some(column_id) = req.updates.column_id {
            if column_id != existing.column_id {
                let board = match self.store.board(existing.board_id).await {
                    Ok(board) => board,
                    Err(StoreError::NotFound(_)) => {
                        return Err(RelayError::Validation("invalid board reference".into()))
                    }
                    Err(e) => return Err(RelayError::Persistence(e)),
                };
                if !board.has_column(column_id) {
                    return Err(RelayError::Validation(
                        "column does not belong to the card's board".into(),
                    ));
                }
            }
        }

        // Separate read and write round-trips: a racing delete can land in
        // between, in which case this surfaces as NotFound to the
        // submitter only.
        let card = self
            .store
            .update_card(req.id, &req.updates, ctx.user_id)
            .await?;

        let _ = self
            .registry
            .broadcast(
                card.board_id,
                &ServerEvent::CardUpdate(card.clone()),
                Some(ctx.session_id),
            )
            .await;
        let _ = self
            .registry
            .send(ctx.session_id, &ServerEvent::CardUpdateOk(card.clone()))
            .await;

        self.activity
            .record(
                ctx.user_id,
                format!("updated card \"{}\"", card.title),
                EntityType::Card,
                Some(card.id),
                Some(card.board_id),
            )
            .await;
        Ok(())
    }

    async fn delete_card(&self, ctx: &SessionCtx, card_id: Uuid) -> Result<(), RelayError> {
        let snapshot = self.store.delete_card(card_id).await?;

        let _ = self
            .registry
            .broadcast(
                snapshot.board_id,
                &ServerEvent::CardDelete(crate::protocol::CardRef { id: card_id }),
                Some(ctx.session_id),
            )
            .await;
        let _ = self
            .registry
            .send(
                ctx.session_id,
                &ServerEvent::CardDeleteOk(crate::protocol::CardRef { id: card_id }),
            )
            .await;

        // Activity uses the pre-deletion title snapshot
        self.activity
            .record(
                ctx.user_id,
                format!("deleted card \"{}\"", snapshot.title),
                EntityType::Card,
                Some(card_id),
                Some(snapshot.board_id),
            )
            .await;
        Ok(())
    }

    /// Upsert the board's note. Notes mutate far too frequently (client
    /// debounce notwithstanding) to make per-save logging meaningful, so
    /// no activity entry is produced.
    async fn update_note(&self, ctx: &SessionCtx, req: UpdateNote) -> Result<(), RelayError> {
        let note = self
            .store
            .upsert_note(req.board_id, req.content, ctx.user_id)
            .await?;

        let _ = self
            .registry
            .broadcast(
                note.board_id,
                &ServerEvent::NoteUpdate(note.clone()),
                Some(ctx.session_id),
            )
            .await;
        let _ = self
            .registry
            .send(ctx.session_id, &ServerEvent::NoteUpdateOk(note))
            .await;
        Ok(())
    }
}
