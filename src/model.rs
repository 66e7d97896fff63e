//! Domain records for boards, cards, notes and the activity feed.
//!
//! All records serialize with camelCase field names, matching the JSON
//! documents the HTTP fetch path serves. Timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Current time as epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Membership role tag. Informational only — no enforcement happens here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Member,
}

/// A board member: user reference plus role tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: Uuid,
    pub role: Role,
}

/// A column embedded in a board. `order` defines display sequence and is
/// unique within the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: Uuid,
    pub title: String,
    pub order: u32,
}

impl Column {
    pub fn new(title: impl Into<String>, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            order,
        }
    }
}

/// A named collaborative workspace containing columns and cards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub columns: Vec<Column>,
    pub members: Vec<Member>,
    pub created_at: u64,
}

impl Board {
    /// Create a board with the standard four columns and the owner as the
    /// sole member.
    pub fn new(title: impl Into<String>, owner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            owner_id,
            columns: vec![
                Column::new("To Do", 0),
                Column::new("In Progress", 1),
                Column::new("Review", 2),
                Column::new("Done", 3),
            ],
            members: vec![Member {
                user_id: owner_id,
                role: Role::Owner,
            }],
            created_at: now_millis(),
        }
    }

    pub fn column(&self, column_id: Uuid) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn has_column(&self, column_id: Uuid) -> bool {
        self.column(column_id).is_some()
    }
}

/// One entry in a card's append-only mutation history.
///
/// Informational only — never consulted for merge logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub by: Uuid,
    pub action: String,
    pub when: u64,
}

/// A task card. `order` is a sortable numeric key (epoch millis at creation,
/// not necessarily contiguous); ties break on `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
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
    pub order: u64,
    pub created_by: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<Uuid>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Card {
    /// Create a card with a freshly assigned order key.
    ///
    /// The key is derived from the current time, so new cards sort after
    /// all existing cards in the absence of manual reordering.
    pub fn new(
        board_id: Uuid,
        column_id: Uuid,
        title: impl Into<String>,
        created_by: Uuid,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            board_id,
            column_id,
            title: title.into(),
            description: None,
            assignee_id: None,
            due_date: None,
            tags: Vec::new(),
            order: now,
            created_by,
            updated_by: None,
            history: vec![HistoryEntry {
                by: created_by,
                action: "created".into(),
                when: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Sort key used when listing a column: `order`, ties broken by
    /// creation time.
    pub fn sort_key(&self) -> (u64, u64) {
        (self.order, self.created_at)
    }
}

/// Shallow-merge patch for a card. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
}

impl CardPatch {
    /// Patch that only moves the card to another column.
    pub fn move_to(column_id: Uuid) -> Self {
        Self {
            column_id: Some(column_id),
            ..Self::default()
        }
    }

    /// Patch that only retitles the card.
    pub fn retitle(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Shallow merge into `card`. Fields not present in the patch retain
    /// their current values (last-write-wins applies per field set).
    pub fn apply(&self, card: &mut Card) {
        if let Some(title) = &self.title {
            card.title = title.clone();
        }
        if let Some(description) = &self.description {
            card.description = Some(description.clone());
        }
        if let Some(column_id) = self.column_id {
            card.column_id = column_id;
        }
        if let Some(assignee_id) = self.assignee_id {
            card.assignee_id = Some(assignee_id);
        }
        if let Some(due_date) = self.due_date {
            card.due_date = Some(due_date);
        }
        if let Some(tags) = &self.tags {
            card.tags = tags.clone();
        }
        if let Some(order) = self.order {
            card.order = order;
        }
    }
}

/// Shared markdown note, one per board (`board_id` unique).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub board_id: Uuid,
    pub content: String,
    pub updated_by: Uuid,
    pub updated_at: u64,
}

/// Entity kind tag on an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Card,
    Board,
    Note,
    User,
    Team,
}

/// Append-only activity log entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<Uuid>,
    pub user_id: Uuid,
    pub action: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    pub created_at: u64,
}

impl Activity {
    pub fn new(
        user_id: Uuid,
        action: impl Into<String>,
        entity_type: EntityType,
        entity_id: Option<Uuid>,
        board_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            board_id,
            user_id,
            action: action.into(),
            entity_type,
            entity_id,
            created_at: now_millis(),
        }
    }
}
