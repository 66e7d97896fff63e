//! Best-effort, append-only activity feed.
//!
//! Every card mutation produces exactly one entry; entries fan out to all
//! connected sessions irrespective of board (a unified global feed, not a
//! room-scoped one). Failure to write an entry never fails or rolls back
//! the mutation it describes — it only produces a server-side log line.

use std::sync::Arc;
use uuid::Uuid;

use crate::model::{Activity, EntityType};
use crate::protocol::ServerEvent;
use crate::registry::RoomRegistry;
use crate::store::BoardStore;

/// Records mutations as human-readable activity entries and fans them out.
#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<BoardStore>,
    registry: Arc<RoomRegistry>,
}

impl ActivityLogger {
    pub fn new(store: Arc<BoardStore>, registry: Arc<RoomRegistry>) -> Self {
        Self { store, registry }
    }

    /// Append an entry and broadcast `activity:new` to every connected
    /// session. Fire-and-forget: both failure modes are logged and
    /// swallowed so the primary mutation's outcome is unaffected.
    pub async fn record(
        &self,
        actor: Uuid,
        action: impl Into<String>,
        entity_type: EntityType,
        entity_id: Option<Uuid>,
        board_id: Option<Uuid>,
    ) {
        let action = action.into();
        let activity = Activity::new(actor, action.clone(), entity_type, entity_id, board_id);

        match self.store.append_activity(activity).await {
            Ok(saved) => {
                if let Err(e) = self.registry.broadcast_all(&ServerEvent::ActivityNew(saved)).await
                {
                    log::error!("failed to fan out activity \"{action}\": {e}");
                }
            }
            Err(e) => {
                log::error!("failed to record activity \"{action}\": {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_record_appends_and_fans_out_globally() {
        let store = Arc::new(BoardStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let logger = ActivityLogger::new(store.clone(), registry.clone());

        // Two sessions, only one in a room — both receive the feed
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        registry.register(s1, tx1).await;
        registry.register(s2, tx2).await;
        registry.join(s1, Uuid::new_v4()).await;

        let actor = Uuid::new_v4();
        logger
            .record(actor, "created card \"Buy milk\"", EntityType::Card, None, None)
            .await;

        assert_eq!(store.activity_count().await, 1);
        let frame1 = rx1.try_recv().unwrap();
        let frame2 = rx2.try_recv().unwrap();
        assert!(frame1.contains("activity:new"));
        assert_eq!(frame1, frame2);
    }

    #[tokio::test]
    async fn test_record_failure_is_silent() {
        let store = Arc::new(BoardStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let logger = ActivityLogger::new(store.clone(), registry.clone());

        let (tx, mut rx) = mpsc::channel(8);
        let s1 = Uuid::new_v4();
        registry.register(s1, tx).await;

        store.set_failing(true);
        // Must not panic or error — the mutation it describes is unaffected
        logger
            .record(Uuid::new_v4(), "updated card \"x\"", EntityType::Card, None, None)
            .await;

        store.set_failing(false);
        assert_eq!(store.activity_count().await, 0);
        // Nothing was broadcast for the failed entry
        assert!(rx.try_recv().is_err());
    }
}
