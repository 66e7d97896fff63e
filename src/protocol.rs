//! JSON wire protocol for the realtime event surface.
//!
//! Every frame is a text message carrying a named event envelope:
//! ```text
//! { "event": "card:create", "data": { ...payload... } }
//! ```
//!
//! Client → server: mutation intents and room membership.
//! Server → originator: direct `:ok` acknowledgments or `error`.
//! Server → other room members: canonical post-mutation broadcasts.
//! Server → everyone: `activity:new` (global feed, board-independent).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Activity, Card, CardPatch, Note};
use crate::presence::PresenceUpdate;

/// Session identity binding, sent once after connecting. Identity issuance
/// itself (auth, sessions) lives outside the sync core; this only tags the
/// connection so mutations carry an actor reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub user_id: Uuid,
    pub name: String,
}

/// `card:create` intent payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCard {
    pub board_id: Uuid,
    pub column_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreateCard {
    pub fn new(board_id: Uuid, column_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            board_id,
            column_id,
            title: title.into(),
            description: None,
            assignee_id: None,
            due_date: None,
            tags: Vec::new(),
        }
    }
}

/// `card:update` intent payload: target id plus shallow-merge patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCard {
    pub id: Uuid,
    pub updates: CardPatch,
}

/// `card:delete` intent and the `card:delete`/`card:delete:ok` payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRef {
    pub id: Uuid,
}

/// `note:update` intent payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNote {
    pub board_id: Uuid,
    pub content: String,
}

/// `error` payload sent to the submitter only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

/// Events a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "hello")]
    Hello(Hello),
    /// Join the room for a board. Idempotent.
    #[serde(rename = "joinBoard")]
    JoinBoard(Uuid),
    /// Leave the room for a board.
    #[serde(rename = "leaveBoard")]
    LeaveBoard(Uuid),
    #[serde(rename = "card:create")]
    CardCreate(CreateCard),
    #[serde(rename = "card:update")]
    CardUpdate(UpdateCard),
    #[serde(rename = "card:delete")]
    CardDelete(CardRef),
    #[serde(rename = "note:update")]
    NoteUpdate(UpdateNote),
}

/// Events the server sends to clients.
///
/// The bare mutation names are room broadcasts (originator excluded); the
/// `:ok` variants are direct acknowledgments to the originator only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "card:create")]
    CardCreate(Card),
    #[serde(rename = "card:update")]
    CardUpdate(Card),
    #[serde(rename = "card:delete")]
    CardDelete(CardRef),
    #[serde(rename = "note:update")]
    NoteUpdate(Note),
    #[serde(rename = "card:create:ok")]
    CardCreateOk(Card),
    #[serde(rename = "card:update:ok")]
    CardUpdateOk(Card),
    #[serde(rename = "card:delete:ok")]
    CardDeleteOk(CardRef),
    #[serde(rename = "note:update:ok")]
    NoteUpdateOk(Note),
    #[serde(rename = "presence:update")]
    Presence(PresenceUpdate),
    #[serde(rename = "activity:new")]
    ActivityNew(Activity),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ClientEvent {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Board, EntityType};
    use crate::presence::PresenceEventKind;

    #[test]
    fn test_join_board_wire_shape() {
        let board_id = Uuid::new_v4();
        let frame = ClientEvent::JoinBoard(board_id).encode().unwrap();

        // Event name matches the observed surface, payload is the bare id
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "joinBoard");
        assert_eq!(value["data"], board_id.to_string());

        let back = ClientEvent::decode(&frame).unwrap();
        assert_eq!(back, ClientEvent::JoinBoard(board_id));
    }

    #[test]
    fn test_card_create_intent_roundtrip() {
        let mut req = CreateCard::new(Uuid::new_v4(), Uuid::new_v4(), "Buy milk");
        req.tags = vec!["errand".into()];

        let frame = ClientEvent::CardCreate(req.clone()).encode().unwrap();
        assert!(frame.contains("\"event\":\"card:create\""));
        assert!(frame.contains("\"boardId\""));

        match ClientEvent::decode(&frame).unwrap() {
            ClientEvent::CardCreate(back) => assert_eq!(back, req),
            other => panic!("expected card:create, got {other:?}"),
        }
    }

    #[test]
    fn test_card_update_defaults_optional_fields() {
        // A patch with only one field present deserializes with the rest None
        let id = Uuid::new_v4();
        let frame = format!(
            r#"{{"event":"card:update","data":{{"id":"{id}","updates":{{"title":"Renamed"}}}}}}"#
        );
        match ClientEvent::decode(&frame).unwrap() {
            ClientEvent::CardUpdate(upd) => {
                assert_eq!(upd.id, id);
                assert_eq!(upd.updates.title.as_deref(), Some("Renamed"));
                assert!(upd.updates.column_id.is_none());
                assert!(upd.updates.tags.is_none());
            }
            other => panic!("expected card:update, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_and_broadcast_are_distinct_events() {
        let owner = Uuid::new_v4();
        let board = Board::new("B", owner);
        let card = crate::model::Card::new(board.id, board.columns[0].id, "Task", owner);

        let broadcast = ServerEvent::CardCreate(card.clone()).encode().unwrap();
        let ack = ServerEvent::CardCreateOk(card).encode().unwrap();

        assert!(broadcast.contains("\"event\":\"card:create\""));
        assert!(ack.contains("\"event\":\"card:create:ok\""));
        assert_ne!(broadcast, ack);
    }

    #[test]
    fn test_delete_payload_is_id_only() {
        let id = Uuid::new_v4();
        let frame = ServerEvent::CardDelete(CardRef { id }).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["data"], serde_json::json!({ "id": id.to_string() }));
    }

    #[test]
    fn test_presence_update_roundtrip() {
        let session = Uuid::new_v4();
        let frame = ServerEvent::Presence(PresenceUpdate::join(session))
            .encode()
            .unwrap();
        assert!(frame.contains("\"event\":\"presence:update\""));
        assert!(frame.contains("\"join\""));

        match ServerEvent::decode(&frame).unwrap() {
            ServerEvent::Presence(p) => {
                assert_eq!(p.session_id, session);
                assert_eq!(p.event, PresenceEventKind::Join);
            }
            other => panic!("expected presence:update, got {other:?}"),
        }
    }

    #[test]
    fn test_activity_new_roundtrip() {
        let activity = Activity::new(
            Uuid::new_v4(),
            "deleted card \"Old\"",
            EntityType::Card,
            None,
            None,
        );
        let frame = ServerEvent::ActivityNew(activity.clone()).encode().unwrap();
        match ServerEvent::decode(&frame).unwrap() {
            ServerEvent::ActivityNew(back) => assert_eq!(back, activity),
            other => panic!("expected activity:new, got {other:?}"),
        }
    }

    #[test]
    fn test_error_event() {
        let frame = ServerEvent::error("Failed to create card").encode().unwrap();
        match ServerEvent::decode(&frame).unwrap() {
            ServerEvent::Error(e) => assert_eq!(e.message, "Failed to create card"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ClientEvent::decode("not json").is_err());
        assert!(ServerEvent::decode("{\"event\":\"nope\"}").is_err());
    }

    #[test]
    fn test_note_update_roundtrip() {
        let req = UpdateNote {
            board_id: Uuid::new_v4(),
            content: "# Notes\n\nhello".into(),
        };
        let frame = ClientEvent::NoteUpdate(req.clone()).encode().unwrap();
        match ClientEvent::decode(&frame).unwrap() {
            ClientEvent::NoteUpdate(back) => assert_eq!(back, req),
            other => panic!("expected note:update, got {other:?}"),
        }
    }
}
