//! # flowboard-collab — Real-time sync core for collaborative Kanban boards
//!
//! Provides WebSocket-based multiplayer board editing with room-scoped
//! broadcast, last-write-wins mutation handling, and a global activity
//! feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     JSON events     │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌──────────────┐
//! │ BoardView   │                     │ MutationRelay│
//! │ NoteSession │                     │ (authority)  │
//! └─────────────┘                     └──────┬───────┘
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                       ┌────────────┐ ┌───────────┐ ┌──────────────┐
//!                       │ BoardStore │ │RoomRegistry│ │ActivityLogger│
//!                       │ (persist)  │ │ (fan-out) │ │ (global feed)│
//!                       └────────────┘ └───────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — Board, card, note and activity records
//! - [`protocol`] — JSON wire protocol (named event envelopes)
//! - [`store`] — Persistence gateway (CRUD, no cross-record transactions)
//! - [`registry`] — Board rooms with backpressured per-session fan-out
//! - [`relay`] — Mutation authority: persist, ack, broadcast, record
//! - [`activity`] — Best-effort global activity feed
//! - [`presence`] — Join/leave presence notifications
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket sync client with debounced note editing
//!
//! ## Delivery semantics
//!
//! | Surface | Recipients | Ordering |
//! |---------|-----------|----------|
//! | `:ok` ack | submitter only | per-channel FIFO |
//! | mutation broadcast | room minus submitter | per-channel FIFO |
//! | `activity:new` | every session | best-effort |
//! | `presence:update` | room minus subject | best-effort |
//!
//! Delivery is per-channel FIFO but not lossless: a session whose
//! outbound channel saturates drops frames and must reconcile by
//! refetching board state (see [`registry::RoomRegistry::broadcast`]).

pub mod activity;
pub mod client;
pub mod model;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use model::{
    Activity, Board, Card, CardPatch, Column, EntityType, HistoryEntry, Member, Note, Role,
};
pub use protocol::{
    CardRef, ClientEvent, CreateCard, ErrorPayload, Hello, ProtocolError, ServerEvent, UpdateCard,
    UpdateNote,
};
pub use activity::ActivityLogger;
pub use client::{
    BoardEvent, BoardView, ConnectionState, NoteDebouncer, NoteSession, SyncClient,
    DEFAULT_IDLE_WINDOW,
};
pub use presence::{PresenceEventKind, PresenceUpdate, RoomPresence};
pub use registry::{Frame, Outbound, RegistryStats, RoomRegistry};
pub use relay::{MutationRelay, RelayError, SessionCtx};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use store::{BoardStore, StoreError};
