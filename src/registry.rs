//! Room registry: maps boards to the sessions currently viewing them.
//!
//! Two indexes are kept side by side:
//! - forward: room (board id) → set of member sessions
//! - reverse: session → set of joined rooms
//!
//! The reverse index makes disconnect cleanup O(rooms joined) instead of a
//! scan over every room. Delivery goes through bounded per-session mpsc
//! channels; a full channel drops the frame and bumps a lock-free counter
//! rather than blocking the event loop (backpressure).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerEvent};

/// Pre-encoded JSON frame, shared across receivers without copying.
pub type Frame = Arc<str>;

/// Outbound channel handle for one connected session.
pub type Outbound = mpsc::Sender<Frame>;

/// Registry statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub active_sessions: usize,
    pub active_rooms: usize,
}

/// Lock-free counters for the delivery hot path.
struct AtomicRegistryStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicRegistryStats {
    fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    /// Session → outbound frame channel.
    sessions: HashMap<Uuid, Outbound>,
    /// Forward index: board → member sessions.
    rooms: HashMap<Uuid, HashSet<Uuid>>,
    /// Reverse index: session → joined boards.
    memberships: HashMap<Uuid, HashSet<Uuid>>,
}

/// The room registry.
///
/// Mutated only from the event-processing tasks; all state sits behind a
/// single lock so the two indexes can never diverge.
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    stats: AtomicRegistryStats,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            stats: AtomicRegistryStats::new(),
        }
    }

    /// Register a connected session with its outbound channel.
    pub async fn register(&self, session_id: Uuid, tx: Outbound) {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session_id, tx);
    }

    /// Add the session to the board's room.
    ///
    /// Idempotent: returns `true` only when the membership is new, so the
    /// caller emits at most one presence "join" per actual join.
    pub async fn join(&self, session_id: Uuid, board_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(&session_id) {
            return false;
        }
        let newly = inner.rooms.entry(board_id).or_default().insert(session_id);
        inner
            .memberships
            .entry(session_id)
            .or_default()
            .insert(board_id);
        newly
    }

    /// Remove the session from the board's room. Returns whether it was a
    /// member.
    pub async fn leave(&self, session_id: Uuid, board_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let was_member = match inner.rooms.get_mut(&board_id) {
            Some(members) => {
                let removed = members.remove(&session_id);
                if members.is_empty() {
                    inner.rooms.remove(&board_id);
                }
                removed
            }
            None => false,
        };
        if let Some(rooms) = inner.memberships.get_mut(&session_id) {
            rooms.remove(&board_id);
            if rooms.is_empty() {
                inner.memberships.remove(&session_id);
            }
        }
        was_member
    }

    /// Remove the session from every room it belonged to and unregister
    /// its channel. Returns the rooms it left, so the caller can emit
    /// presence "leave" notifications. No leaked memberships.
    pub async fn drop_session(&self, session_id: Uuid) -> Vec<Uuid> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(&session_id);

        let joined = inner.memberships.remove(&session_id).unwrap_or_default();
        for board_id in &joined {
            if let Some(members) = inner.rooms.get_mut(board_id) {
                members.remove(&session_id);
                if members.is_empty() {
                    inner.rooms.remove(board_id);
                }
            }
        }
        joined.into_iter().collect()
    }

    /// Deliver `event` to every session in the board's room except the
    /// optionally excluded one. Broadcasting to an empty or absent room is
    /// a silent no-op. Returns the number of sessions delivered to.
    ///
    /// The frame is encoded once and shared across all receivers. A
    /// session whose outbound channel is full loses the frame (counted in
    /// `frames_dropped`); such a client has fallen behind the stream and
    /// must reconcile by refetching board state.
    pub async fn broadcast(
        &self,
        board_id: Uuid,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(event.encode()?);
        let inner = self.inner.read().await;
        let members = match inner.rooms.get(&board_id) {
            Some(members) => members,
            None => return Ok(0),
        };

        let mut delivered = 0;
        for session_id in members {
            if Some(*session_id) == exclude {
                continue;
            }
            if let Some(tx) = inner.sessions.get(session_id) {
                delivered += self.deliver(tx, frame.clone());
            }
        }
        Ok(delivered)
    }

    /// Deliver `event` to every connected session, irrespective of rooms.
    /// Used for the global activity feed.
    pub async fn broadcast_all(&self, event: &ServerEvent) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(event.encode()?);
        let inner = self.inner.read().await;
        let mut delivered = 0;
        for tx in inner.sessions.values() {
            delivered += self.deliver(tx, frame.clone());
        }
        Ok(delivered)
    }

    /// Deliver `event` to a single session (direct acks and errors).
    /// Sending to an unknown session is a no-op — the session may have
    /// disconnected while its mutation was still in flight.
    pub async fn send(&self, session_id: Uuid, event: &ServerEvent) -> Result<(), ProtocolError> {
        let frame: Frame = Arc::from(event.encode()?);
        let inner = self.inner.read().await;
        if let Some(tx) = inner.sessions.get(&session_id) {
            self.deliver(tx, frame);
        }
        Ok(())
    }

    fn deliver(&self, tx: &Outbound, frame: Frame) -> usize {
        match tx.try_send(frame) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                1
            }
            Err(_) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    // ── Introspection ───────────────────────────────────────────────

    pub async fn is_member(&self, session_id: Uuid, board_id: Uuid) -> bool {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(&board_id)
            .is_some_and(|members| members.contains(&session_id))
    }

    pub async fn member_count(&self, board_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner.rooms.get(&board_id).map_or(0, |m| m.len())
    }

    /// Rooms the session currently belongs to.
    pub async fn rooms_of(&self, session_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .memberships
            .get(&session_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Statistics snapshot (counters read lock-free).
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            active_sessions: inner.sessions.len(),
            active_rooms: inner.rooms.len(),
        }
    }
}
