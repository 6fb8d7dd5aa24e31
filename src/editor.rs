//! Collaborative editor seam.
//!
//! An [`Editor`] is mounted on one note at a time. Readiness and sync-state
//! changes travel as [`EditorEvent`]s tagged with the instance id, so events
//! from an instance that has since been disposed can be told apart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::Store;
use crate::types::{now_ms, HistoryEntry, NoteKey, TextEdit, UserId};

pub type InstanceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorEventKind {
    /// The document is loaded and editable.
    Ready,
    /// `false` right after a local edit, `true` once it reached the store.
    Synced(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorEvent {
    pub instance: InstanceId,
    pub kind: EditorEventKind,
}

pub type EditorEventSink = mpsc::UnboundedSender<EditorEvent>;

#[async_trait]
pub trait Editor: Send + Sync {
    fn instance(&self) -> InstanceId;
    async fn attach(&mut self, note: &NoteKey) -> Result<()>;
    async fn apply(&mut self, edit: TextEdit) -> Result<HistoryEntry>;
    /// Current document text as the editor sees it.
    async fn current_text(&self) -> Result<String>;
    /// Release the document. The instance emits nothing afterwards.
    fn dispose(&mut self);
    fn is_disposed(&self) -> bool;
}

/// Creates editor instances. One backend lives for the whole process.
pub trait EditorBackend: Send + Sync {
    fn create(&self, user: &UserId, events: EditorEventSink) -> Box<dyn Editor>;
}

/// Editor that reads and writes straight through the realtime store.
pub struct StoreEditor {
    instance: InstanceId,
    store: Arc<dyn Store>,
    user: UserId,
    note: Option<NoteKey>,
    events: EditorEventSink,
    disposed: bool,
}

impl StoreEditor {
    fn emit(&self, kind: EditorEventKind) {
        if self.disposed {
            return;
        }
        let _ = self.events.send(EditorEvent { instance: self.instance, kind });
    }
}

#[async_trait]
impl Editor for StoreEditor {
    fn instance(&self) -> InstanceId {
        self.instance
    }

    async fn attach(&mut self, note: &NoteKey) -> Result<()> {
        if self.disposed {
            bail!("editor {} already disposed", self.instance);
        }
        // Library default: presence is dropped when the connection goes away.
        self.store.register_presence(note, &self.user, true).await?;
        self.note = Some(note.clone());
        tracing::debug!(instance = self.instance, %note, "editor attached");
        self.emit(EditorEventKind::Ready);
        Ok(())
    }

    async fn apply(&mut self, edit: TextEdit) -> Result<HistoryEntry> {
        if self.disposed {
            bail!("editor {} already disposed", self.instance);
        }
        let Some(note) = self.note.clone() else {
            bail!("editor {} is not attached", self.instance);
        };
        self.emit(EditorEventKind::Synced(false));
        let entry = self.store.apply_edit(&note, &edit, now_ms()).await?;
        self.emit(EditorEventKind::Synced(true));
        Ok(entry)
    }

    async fn current_text(&self) -> Result<String> {
        match &self.note {
            Some(note) => self.store.note_text(note).await,
            None => Ok(String::new()),
        }
    }

    fn dispose(&mut self) {
        if !self.disposed {
            tracing::debug!(instance = self.instance, "editor disposed");
        }
        self.disposed = true;
        self.note = None;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

pub struct StoreEditorBackend {
    store: Arc<dyn Store>,
    next_instance: AtomicU64,
}

impl StoreEditorBackend {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, next_instance: AtomicU64::new(1) }
    }
}

impl EditorBackend for StoreEditorBackend {
    fn create(&self, user: &UserId, events: EditorEventSink) -> Box<dyn Editor> {
        Box::new(StoreEditor {
            instance: self.next_instance.fetch_add(1, Ordering::Relaxed),
            store: Arc::clone(&self.store),
            user: user.clone(),
            note: None,
            events,
            disposed: false,
        })
    }
}
