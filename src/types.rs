use std::fmt;

use serde::{Deserialize, Serialize};

pub const STATUS_SYNCED: &str = "Data synced.";
pub const STATUS_SYNCING: &str = "Syncing...";
pub const STATUS_RESOLVING: &str = "Syncing your data now...";
pub const STATUS_SIGNED_OUT: &str = "Signed out";
pub const SIGN_IN_LABEL: &str = "Sign in";
pub const SIGN_OUT_LABEL: &str = "Sign out";

/// Wall-clock time as Unix ms.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Key of a note document (`notes/{key}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteKey(String);

impl NoteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity-provider user id (`users/{uid}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: UserId,
    pub display_name: String,
    pub email: Option<String>,
}

/// Per-user sort key for the notes list.
///
/// Stored as the negated modification timestamp, so ascending order of the
/// stored value is most-recent-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recency(i64);

impl Recency {
    pub fn from_timestamp(timestamp_ms: i64) -> Self {
        Self(timestamp_ms.saturating_neg())
    }

    pub fn from_stored(value: i64) -> Self {
        Self(value)
    }

    pub fn stored(self) -> i64 {
        self.0
    }

    pub fn timestamp(self) -> i64 {
        self.0.saturating_neg()
    }
}

/// The `users/{uid}` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub display_name: String,
    pub last_note: Option<NoteKey>,
    /// Owned notes, ascending by stored recency value (most recent first).
    pub notes: Vec<(NoteKey, Recency)>,
}

/// One entry of a note's `history` sub-path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Character offset where the edit starts.
    pub offset: usize,
    /// Unix timestamp in ms.
    pub timestamp: i64,
}

/// A single text operation against a note's content.
/// Offsets and lengths are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub offset: usize,
    pub delete: usize,
    pub insert: String,
}

impl TextEdit {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self { offset, delete: 0, insert: text.into() }
    }

    pub fn delete(offset: usize, len: usize) -> Self {
        Self { offset, delete: len, insert: String::new() }
    }

    /// Apply to `text`, clamping out-of-range offsets to the end.
    pub fn apply(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let start = self.offset.min(chars.len());
        let end = start.saturating_add(self.delete).min(chars.len());
        let mut out = String::with_capacity(text.len() + self.insert.len());
        out.extend(&chars[..start]);
        out.push_str(&self.insert);
        out.extend(&chars[end..]);
        out
    }
}

// ─── UI model ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub disabled: bool,
}

/// The note-editing container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EditorPane {
    pub note: Option<NoteKey>,
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
    pub key: NoteKey,
    pub label: String,
    pub selected: bool,
    pub recency: Recency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListPane {
    pub visible: bool,
    pub items: Vec<ListItem>,
}

impl ListPane {
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn contains(&self, key: &NoteKey) -> bool {
        self.items.iter().any(|i| &i.key == key)
    }

    pub fn item_mut(&mut self, key: &NoteKey) -> Option<&mut ListItem> {
        self.items.iter_mut().find(|i| &i.key == key)
    }

    /// Insert keeping ascending recency order; ties go after existing items.
    pub fn insert_ordered(&mut self, item: ListItem) {
        let pos = self.items.partition_point(|i| i.recency <= item.recency);
        self.items.insert(pos, item);
    }

    pub fn selected(&self) -> Option<&NoteKey> {
        self.items.iter().find(|i| i.selected).map(|i| &i.key)
    }
}

/// Everything the sidebar and status UI show, rebuilt by the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiState {
    pub editor: EditorPane,
    pub sign_in_status: String,
    pub sign_in_button: Button,
    pub data_status: String,
    pub new_note_button: Button,
    pub notes_list: ListPane,
    pub search_results: ListPane,
    pub search_input: String,
    /// Blocking notice shown to the user (e.g. a credential collision).
    pub notice: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            editor: EditorPane::default(),
            sign_in_status: STATUS_SIGNED_OUT.to_string(),
            sign_in_button: Button { label: SIGN_IN_LABEL.to_string(), disabled: true },
            data_status: String::new(),
            new_note_button: Button { label: "New note".to_string(), disabled: true },
            notes_list: ListPane { visible: true, items: Vec::new() },
            search_results: ListPane::default(),
            search_input: String::new(),
            notice: None,
        }
    }
}
