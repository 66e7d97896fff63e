//! Lightweight join/leave presence for board rooms.
//!
//! Presence carries no ordering guarantee relative to mutation broadcasts
//! and is never persisted. It exists only so clients can show who is
//! currently viewing a board ("N people viewing").

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Kind of presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceEventKind {
    Join,
    Leave,
}

/// `presence:update` payload, broadcast to a room when a session enters or
/// exits (the session itself is excluded).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub session_id: Uuid,
    pub event: PresenceEventKind,
}

impl PresenceUpdate {
    pub fn join(session_id: Uuid) -> Self {
        Self {
            session_id,
            event: PresenceEventKind::Join,
        }
    }

    pub fn leave(session_id: Uuid) -> Self {
        Self {
            session_id,
            event: PresenceEventKind::Leave,
        }
    }
}

/// Client-side tracker for the remote sessions viewing a board.
///
/// Updates are applied as they arrive; a leave for an unknown session is a
/// no-op (presence is best-effort, not a membership protocol).
#[derive(Debug, Default)]
pub struct RoomPresence {
    viewers: HashSet<Uuid>,
}

impl RoomPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, update: &PresenceUpdate) {
        match update.event {
            PresenceEventKind::Join => {
                self.viewers.insert(update.session_id);
            }
            PresenceEventKind::Leave => {
                self.viewers.remove(&update.session_id);
            }
        }
    }

    /// Number of *other* sessions currently viewing the board.
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_viewing(&self, session_id: Uuid) -> bool {
        self.viewers.contains(&session_id)
    }

    pub fn viewers(&self) -> impl Iterator<Item = &Uuid> {
        self.viewers.iter()
    }
}
