//! The realtime store seam.
//!
//! Conceptual layout:
//!   notes/{key}            content, `name`, `history` (offset + timestamp per edit),
//!                          `users` (presence records)
//!   users/{uid}            `display_name`, `last_note`, `notes/{key} -> recency`,
//!                          `search_index` (serialized snapshot)
//!
//! Writes fan out as [`StoreEvent`]s. Ordering holds per path only.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{HistoryEntry, NoteKey, Recency, TextEdit, UserId, UserRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// First recency value written for `key` under `uid`.
    NoteAdded { uid: UserId, key: NoteKey, recency: Recency },
    /// Recency value of an already-listed note changed.
    RecencyChanged { uid: UserId, key: NoteKey, recency: Recency },
    LastNoteChanged { uid: UserId, key: NoteKey },
    NameChanged { key: NoteKey, name: String },
    HistoryAppended { key: NoteKey, entry: HistoryEntry },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub uid: UserId,
    pub remove_on_disconnect: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Allocate a fresh note key. Nothing is written until the note is used.
    async fn push_note_key(&self) -> Result<NoteKey>;

    async fn user(&self, uid: &UserId) -> Result<Option<UserRecord>>;
    async fn ensure_user(&self, uid: &UserId, display_name: &str) -> Result<()>;
    async fn set_last_note(&self, uid: &UserId, key: &NoteKey) -> Result<()>;
    async fn set_recency(&self, uid: &UserId, key: &NoteKey, recency: Recency) -> Result<()>;
    /// The user's notes, ascending by stored recency value.
    async fn user_notes(&self, uid: &UserId) -> Result<Vec<(NoteKey, Recency)>>;

    /// Headless read of a note's current text. Unknown notes read as empty.
    async fn note_text(&self, key: &NoteKey) -> Result<String>;
    /// Apply `edit` to the note's content and append a history entry.
    async fn apply_edit(&self, key: &NoteKey, edit: &TextEdit, timestamp: i64) -> Result<HistoryEntry>;
    async fn note_name(&self, key: &NoteKey) -> Result<Option<String>>;
    async fn set_note_name(&self, key: &NoteKey, name: &str) -> Result<()>;

    async fn search_index(&self, uid: &UserId) -> Result<Option<String>>;
    async fn set_search_index(&self, uid: &UserId, snapshot: &str) -> Result<()>;

    async fn register_presence(&self, key: &NoteKey, uid: &UserId, remove_on_disconnect: bool) -> Result<()>;
    /// Keep the presence record when `uid` drops its connection.
    async fn cancel_on_disconnect(&self, key: &NoteKey, uid: &UserId) -> Result<()>;
    /// Simulate `uid` dropping its connection.
    async fn disconnect(&self, uid: &UserId) -> Result<()>;
    async fn presence(&self, key: &NoteKey) -> Result<Vec<Presence>>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
