use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use crate::store::{Presence, Store, StoreEvent};
use crate::types::{HistoryEntry, NoteKey, Recency, TextEdit, UserId, UserRecord};

const EVENT_CAPACITY: usize = 1024;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        key      TEXT PRIMARY KEY,
        content  TEXT NOT NULL DEFAULT '',
        name     TEXT
    );
    CREATE TABLE IF NOT EXISTS history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        note_key     TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        created_at   INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS presence (
        note_key             TEXT NOT NULL,
        uid                  TEXT NOT NULL,
        remove_on_disconnect INTEGER NOT NULL,
        PRIMARY KEY (note_key, uid)
    );
    CREATE TABLE IF NOT EXISTS users (
        uid          TEXT PRIMARY KEY,
        display_name TEXT NOT NULL DEFAULT '',
        last_note    TEXT,
        search_index TEXT
    );
    CREATE TABLE IF NOT EXISTS user_notes (
        uid      TEXT NOT NULL,
        note_key TEXT NOT NULL,
        recency  INTEGER NOT NULL,
        PRIMARY KEY (uid, note_key)
    );
    CREATE INDEX IF NOT EXISTS user_notes_by_recency ON user_notes (uid, recency);
";

/// SQLite-backed realtime store. One connection guarded by a mutex; every
/// committed write is broadcast as a [`StoreEvent`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self { conn: Mutex::new(conn), events })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {e}"))
    }

    fn emit(&self, event: StoreEvent) {
        tracing::trace!(?event, "store event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn push_note_key(&self) -> Result<NoteKey> {
        Ok(NoteKey::new(uuid::Uuid::new_v4().simple().to_string()))
    }

    async fn user(&self, uid: &UserId) -> Result<Option<UserRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT display_name, last_note FROM users WHERE uid = ?1",
                [uid.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        let Some((display_name, last_note)) = row else {
            return Ok(None);
        };
        let notes = query_user_notes(&conn, uid)?;
        Ok(Some(UserRecord {
            display_name,
            last_note: last_note.map(NoteKey::new),
            notes,
        }))
    }

    async fn ensure_user(&self, uid: &UserId, display_name: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO users (uid, display_name) VALUES (?1, ?2)
             ON CONFLICT(uid) DO UPDATE SET display_name = excluded.display_name",
            params![uid.as_str(), display_name],
        )?;
        Ok(())
    }

    async fn set_last_note(&self, uid: &UserId, key: &NoteKey) -> Result<()> {
        let changed = {
            let conn = self.lock()?;
            let previous: Option<Option<String>> = conn
                .query_row("SELECT last_note FROM users WHERE uid = ?1", [uid.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            conn.execute(
                "INSERT INTO users (uid, last_note) VALUES (?1, ?2)
                 ON CONFLICT(uid) DO UPDATE SET last_note = excluded.last_note",
                params![uid.as_str(), key.as_str()],
            )?;
            previous.flatten().as_deref() != Some(key.as_str())
        };
        if changed {
            self.emit(StoreEvent::LastNoteChanged { uid: uid.clone(), key: key.clone() });
        }
        Ok(())
    }

    async fn set_recency(&self, uid: &UserId, key: &NoteKey, recency: Recency) -> Result<()> {
        let previous = {
            let conn = self.lock()?;
            let previous: Option<i64> = conn
                .query_row(
                    "SELECT recency FROM user_notes WHERE uid = ?1 AND note_key = ?2",
                    [uid.as_str(), key.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            conn.execute(
                "INSERT INTO user_notes (uid, note_key, recency) VALUES (?1, ?2, ?3)
                 ON CONFLICT(uid, note_key) DO UPDATE SET recency = excluded.recency",
                params![uid.as_str(), key.as_str(), recency.stored()],
            )?;
            previous
        };
        match previous {
            None => self.emit(StoreEvent::NoteAdded { uid: uid.clone(), key: key.clone(), recency }),
            Some(old) if old != recency.stored() => {
                self.emit(StoreEvent::RecencyChanged { uid: uid.clone(), key: key.clone(), recency })
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn user_notes(&self, uid: &UserId) -> Result<Vec<(NoteKey, Recency)>> {
        let conn = self.lock()?;
        query_user_notes(&conn, uid)
    }

    async fn note_text(&self, key: &NoteKey) -> Result<String> {
        let text = self
            .lock()?
            .query_row("SELECT content FROM notes WHERE key = ?1", [key.as_str()], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(text.unwrap_or_default())
    }

    async fn apply_edit(&self, key: &NoteKey, edit: &TextEdit, timestamp: i64) -> Result<HistoryEntry> {
        let entry = HistoryEntry { offset: edit.offset, timestamp };
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let current: String = tx
                .query_row("SELECT content FROM notes WHERE key = ?1", [key.as_str()], |row| {
                    row.get(0)
                })
                .optional()?
                .unwrap_or_default();
            tx.execute(
                "INSERT INTO notes (key, content) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET content = excluded.content",
                params![key.as_str(), edit.apply(&current)],
            )?;
            tx.execute(
                "INSERT INTO history (note_key, start_offset, created_at) VALUES (?1, ?2, ?3)",
                params![key.as_str(), edit.offset as i64, timestamp],
            )?;
            tx.commit()?;
        }
        self.emit(StoreEvent::HistoryAppended { key: key.clone(), entry });
        Ok(entry)
    }

    async fn note_name(&self, key: &NoteKey) -> Result<Option<String>> {
        let name = self
            .lock()?
            .query_row("SELECT name FROM notes WHERE key = ?1", [key.as_str()], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(name.flatten())
    }

    async fn set_note_name(&self, key: &NoteKey, name: &str) -> Result<()> {
        let changed = {
            let conn = self.lock()?;
            let previous: Option<Option<String>> = conn
                .query_row("SELECT name FROM notes WHERE key = ?1", [key.as_str()], |row| row.get(0))
                .optional()?;
            conn.execute(
                "INSERT INTO notes (key, name) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET name = excluded.name",
                params![key.as_str(), name],
            )?;
            previous.flatten().as_deref() != Some(name)
        };
        if changed {
            self.emit(StoreEvent::NameChanged { key: key.clone(), name: name.to_string() });
        }
        Ok(())
    }

    async fn search_index(&self, uid: &UserId) -> Result<Option<String>> {
        let snapshot = self
            .lock()?
            .query_row("SELECT search_index FROM users WHERE uid = ?1", [uid.as_str()], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(snapshot.flatten())
    }

    async fn set_search_index(&self, uid: &UserId, snapshot: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO users (uid, search_index) VALUES (?1, ?2)
             ON CONFLICT(uid) DO UPDATE SET search_index = excluded.search_index",
            params![uid.as_str(), snapshot],
        )?;
        Ok(())
    }

    async fn register_presence(&self, key: &NoteKey, uid: &UserId, remove_on_disconnect: bool) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO presence (note_key, uid, remove_on_disconnect) VALUES (?1, ?2, ?3)
             ON CONFLICT(note_key, uid) DO UPDATE SET remove_on_disconnect = excluded.remove_on_disconnect",
            params![key.as_str(), uid.as_str(), remove_on_disconnect],
        )?;
        Ok(())
    }

    async fn cancel_on_disconnect(&self, key: &NoteKey, uid: &UserId) -> Result<()> {
        self.lock()?.execute(
            "UPDATE presence SET remove_on_disconnect = 0 WHERE note_key = ?1 AND uid = ?2",
            [key.as_str(), uid.as_str()],
        )?;
        Ok(())
    }

    async fn disconnect(&self, uid: &UserId) -> Result<()> {
        let removed = self.lock()?.execute(
            "DELETE FROM presence WHERE uid = ?1 AND remove_on_disconnect = 1",
            [uid.as_str()],
        )?;
        tracing::debug!(%uid, removed, "disconnect cleanup");
        Ok(())
    }

    async fn presence(&self, key: &NoteKey) -> Result<Vec<Presence>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT uid, remove_on_disconnect FROM presence WHERE note_key = ?1 ORDER BY uid",
        )?;
        let rows = stmt
            .query_map([key.as_str()], |row| {
                Ok(Presence {
                    uid: UserId::new(row.get::<_, String>(0)?),
                    remove_on_disconnect: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

fn query_user_notes(conn: &Connection, uid: &UserId) -> Result<Vec<(NoteKey, Recency)>> {
    let mut stmt = conn.prepare(
        "SELECT note_key, recency FROM user_notes
         WHERE uid = ?1
         ORDER BY recency ASC, note_key ASC",
    )?;
    let notes = stmt
        .query_map([uid.as_str()], |row| {
            Ok((
                NoteKey::new(row.get::<_, String>(0)?),
                Recency::from_stored(row.get::<_, i64>(1)?),
            ))
        })?
        .filter_map(|r| {
            r.map_err(|e| tracing::warn!("Skipping malformed user_notes row: {e}"))
                .ok()
        })
        .collect();
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid() -> UserId {
        UserId::new("u1")
    }

    fn drain(rx: &mut broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn user_notes_come_back_most_recent_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (a, b, c) = (NoteKey::new("a"), NoteKey::new("b"), NoteKey::new("c"));
        store.set_recency(&uid(), &a, Recency::from_timestamp(100)).await.unwrap();
        store.set_recency(&uid(), &b, Recency::from_timestamp(300)).await.unwrap();
        store.set_recency(&uid(), &c, Recency::from_timestamp(200)).await.unwrap();

        let keys: Vec<_> = store
            .user_notes(&uid())
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b, c, a]);
        assert!(store.user_notes(&UserId::new("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recency_events_distinguish_added_from_changed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        let key = NoteKey::new("n");
        store.set_recency(&uid(), &key, Recency::from_timestamp(1)).await.unwrap();
        store.set_recency(&uid(), &key, Recency::from_timestamp(1)).await.unwrap();
        store.set_recency(&uid(), &key, Recency::from_timestamp(2)).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StoreEvent::NoteAdded { .. }));
        assert!(matches!(events[1], StoreEvent::RecencyChanged { .. }));
    }

    #[tokio::test]
    async fn apply_edit_updates_content_and_appends_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        let key = NoteKey::new("n");

        store.apply_edit(&key, &TextEdit::insert(0, "hello"), 10).await.unwrap();
        let entry = store.apply_edit(&key, &TextEdit::insert(5, " world"), 20).await.unwrap();

        assert_eq!(entry, HistoryEntry { offset: 5, timestamp: 20 });
        assert_eq!(store.note_text(&key).await.unwrap(), "hello world");
        assert_eq!(
            drain(&mut rx).last(),
            Some(&StoreEvent::HistoryAppended { key: key.clone(), entry })
        );
        assert_eq!(store.note_text(&NoteKey::new("missing")).await.unwrap(), "");
    }

    #[tokio::test]
    async fn name_and_last_note_only_notify_on_change() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();
        let key = NoteKey::new("n");

        store.set_note_name(&key, "first...").await.unwrap();
        store.set_note_name(&key, "first...").await.unwrap();
        store.set_last_note(&uid(), &key).await.unwrap();
        store.set_last_note(&uid(), &key).await.unwrap();

        assert_eq!(drain(&mut rx).len(), 2);
        assert_eq!(store.note_name(&key).await.unwrap().as_deref(), Some("first..."));
        let user = store.user(&uid()).await.unwrap().unwrap();
        assert_eq!(user.last_note, Some(key));
    }

    #[tokio::test]
    async fn unknown_user_reads_as_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.user(&uid()).await.unwrap().is_none());
        store.ensure_user(&uid(), "Ada").await.unwrap();
        let user = store.user(&uid()).await.unwrap().unwrap();
        assert_eq!(user.display_name, "Ada");
        assert!(user.last_note.is_none());
        assert!(user.notes.is_empty());
    }

    #[tokio::test]
    async fn cancelled_presence_survives_disconnect() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (kept, dropped) = (NoteKey::new("kept"), NoteKey::new("dropped"));
        store.register_presence(&kept, &uid(), true).await.unwrap();
        store.register_presence(&dropped, &uid(), true).await.unwrap();
        store.cancel_on_disconnect(&kept, &uid()).await.unwrap();

        store.disconnect(&uid()).await.unwrap();

        assert_eq!(store.presence(&kept).await.unwrap().len(), 1);
        assert!(store.presence(&dropped).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_search_index(&uid(), "{\"v\":1}").await.unwrap();
            store.apply_edit(&NoteKey::new("n"), &TextEdit::insert(0, "kept"), 1).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.search_index(&uid()).await.unwrap().as_deref(), Some("{\"v\":1}"));
        assert_eq!(store.note_text(&NoteKey::new("n")).await.unwrap(), "kept");
    }
}
