//! Persistence gateway: CRUD over board/card/note/activity records.
//!
//! The storage engine itself is an external collaborator; this in-process
//! implementation keeps everything in maps behind an async lock. Methods
//! are async on purpose — every call is a real suspension point, so two
//! mutation handlers targeting the same card interleave their persistence
//! round-trips exactly like they would against a remote document store.
//! That interleaving is the root cause of the last-write-wins race the
//! relay documents.
//!
//! No transaction spans multiple records: each create/update/delete is a
//! single independent operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{now_millis, Activity, Board, Card, CardPatch, HistoryEntry, Note};

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// The referenced record does not exist.
    NotFound(String),
    /// The backing store rejected the operation or is unreachable.
    Unavailable,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "{what} not found"),
            Self::Unavailable => write!(f, "storage unavailable"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Default)]
struct StoreInner {
    boards: HashMap<Uuid, Board>,
    cards: HashMap<Uuid, Card>,
    /// Keyed by board id — one note per board.
    notes: HashMap<Uuid, Note>,
    activities: Vec<Activity>,
}

/// In-memory board store.
#[derive(Default)]
pub struct BoardStore {
    inner: RwLock<StoreInner>,
    /// Fault injection for tests: when set, every write is rejected.
    failing: AtomicBool,
}

impl BoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    /// Used to exercise persistence-failure paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    // ── Boards ──────────────────────────────────────────────────────

    pub async fn create_board(&self, board: Board) -> Result<Board, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner.boards.insert(board.id, board.clone());
        Ok(board)
    }

    pub async fn board(&self, board_id: Uuid) -> Result<Board, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        inner
            .boards
            .get(&board_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("board".into()))
    }

    /// Boards the user owns or is a member of.
    pub async fn boards_for(&self, user_id: Uuid) -> Result<Vec<Board>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .boards
            .values()
            .filter(|b| b.owner_id == user_id || b.members.iter().any(|m| m.user_id == user_id))
            .cloned()
            .collect())
    }

    // ── Cards ───────────────────────────────────────────────────────

    pub async fn insert_card(&self, card: Card) -> Result<Card, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner.cards.insert(card.id, card.clone());
        Ok(card)
    }

    pub async fn card(&self, card_id: Uuid) -> Result<Card, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        inner
            .cards
            .get(&card_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("card".into()))
    }

    /// Shallow-merge `patch` into the card and return the updated record.
    ///
    /// The merge happens atomically against current stored state, so the
    /// later of two racing updates fully overwrites the fields present in
    /// its payload and nothing else.
    pub async fn update_card(
        &self,
        card_id: Uuid,
        patch: &CardPatch,
        actor: Uuid,
    ) -> Result<Card, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let card = inner
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| StoreError::NotFound("card".into()))?;

        patch.apply(card);
        card.updated_by = Some(actor);
        card.updated_at = now_millis();
        card.history.push(HistoryEntry {
            by: actor,
            action: "updated".into(),
            when: card.updated_at,
        });
        Ok(card.clone())
    }

    /// Remove the card and return the pre-deletion snapshot.
    pub async fn delete_card(&self, card_id: Uuid) -> Result<Card, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner
            .cards
            .remove(&card_id)
            .ok_or_else(|| StoreError::NotFound("card".into()))
    }

    /// All cards on a board, sorted by (order, created_at).
    pub async fn cards_for_board(&self, board_id: Uuid) -> Result<Vec<Card>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut cards: Vec<Card> = inner
            .cards
            .values()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.sort_key());
        Ok(cards)
    }

    // ── Notes ───────────────────────────────────────────────────────

    /// Upsert the note keyed by board id. An absent note is lazily created
    /// on first write.
    pub async fn upsert_note(
        &self,
        board_id: Uuid,
        content: String,
        actor: Uuid,
    ) -> Result<Note, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let note = Note {
            board_id,
            content,
            updated_by: actor,
            updated_at: now_millis(),
        };
        inner.notes.insert(board_id, note.clone());
        Ok(note)
    }

    /// The board's note, if one has ever been written.
    pub async fn note(&self, board_id: Uuid) -> Result<Option<Note>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.notes.get(&board_id).cloned())
    }

    // ── Activity ────────────────────────────────────────────────────

    pub async fn append_activity(&self, activity: Activity) -> Result<Activity, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner.activities.push(activity.clone());
        Ok(activity)
    }

    /// Most recent activity entries, newest first.
    pub async fn recent_activities(&self, limit: usize) -> Result<Vec<Activity>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.activities.iter().rev().take(limit).cloned().collect())
    }

    pub async fn activity_count(&self) -> usize {
        self.inner.read().await.activities.len()
    }

    pub async fn card_count(&self) -> usize {
        self.inner.read().await.cards.len()
    }
}
