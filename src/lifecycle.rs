//! Note Lifecycle Controller: open, create, and react to edits of the open note.

use std::sync::Arc;

use anyhow::Result;

use crate::app::{Event, Services};
use crate::editor::{EditorEvent, EditorEventKind};
use crate::session::SessionContext;
use crate::store::Store;
use crate::types::{
    now_ms, EditorPane, HistoryEntry, NoteKey, Recency, TextEdit, UiState, UserId, STATUS_SYNCED,
    STATUS_SYNCING,
};
use crate::{notes_list, search};

/// Display name for a note: the first `len` characters with newlines turned
/// into spaces, followed by an ellipsis.
pub fn derive_name(text: &str, len: usize) -> String {
    let prefix: String = text.chars().take(len).collect();
    format!("{}...", prefix.replace('\n', " "))
}

/// Mount `key` in the editor pane, replacing whatever was open. The pane and
/// the session only point at `key` once its editor attached.
pub(crate) async fn open(
    svc: &Services,
    ui: &mut UiState,
    ctx: &mut SessionContext,
    key: &NoteKey,
) -> Result<()> {
    // Dispose before creating so two instances never feed the same pane.
    if let Some(mut previous) = ctx.editor.take() {
        previous.dispose();
    }
    ctx.editor_ready = false;
    ctx.synced = true;
    ctx.open_note = None;
    ui.editor.note = None;

    let uid = ctx.user.uid.clone();
    let mut editor = svc.editors.create(&uid, svc.editor_events.clone());
    editor.attach(key).await?;

    ctx.editor = Some(editor);
    ctx.open_note = Some(key.clone());
    ui.editor = EditorPane {
        note: Some(key.clone()),
        placeholder: svc.config.default_text.clone(),
    };
    notes_list::mark_selected(ui, key);

    svc.store.set_last_note(&uid, key).await?;
    // The editor asks for its presence record to be deleted on disconnect; we keep it.
    svc.store.cancel_on_disconnect(key, &uid).await?;
    tracing::info!(%key, "note opened");
    Ok(())
}

/// Allocate a note, stamp it in the background and open it right away.
pub(crate) async fn create_new(svc: &Services, ui: &mut UiState, ctx: &mut SessionContext) -> Result<()> {
    let key = svc.store.push_note_key().await?;
    tracing::info!(%key, "creating note");

    let store = Arc::clone(&svc.store);
    let inbox = svc.inbox.clone();
    let uid = ctx.user.uid.clone();
    let stamped = key.clone();
    tokio::spawn(async move {
        if let Err(e) = stamp_new_note(store.as_ref(), &uid, &stamped).await {
            let _ = inbox.send(Event::BackgroundError(format!("Failed to save new note: {e:#}")));
        }
    });

    open(svc, ui, ctx, &key).await
}

async fn stamp_new_note(store: &dyn Store, uid: &UserId, key: &NoteKey) -> Result<()> {
    store.set_last_note(uid, key).await?;
    store.set_recency(uid, key, Recency::from_timestamp(now_ms())).await
}

/// Forward a local edit to the mounted editor.
pub(crate) async fn edit(ctx: &mut SessionContext, edit: TextEdit) -> Result<()> {
    let Some(editor) = ctx.editor.as_mut() else {
        tracing::warn!("edit ignored: no note open");
        return Ok(());
    };
    editor.apply(edit).await?;
    Ok(())
}

pub(crate) fn on_editor_event(ui: &mut UiState, ctx: &mut SessionContext, event: EditorEvent) {
    if ctx.editor.as_ref().map(|e| e.instance()) != Some(event.instance) {
        tracing::debug!(instance = event.instance, "ignoring event from a disposed editor");
        return;
    }
    match event.kind {
        EditorEventKind::Ready => {
            ctx.editor_ready = true;
            if let Some(key) = ctx.open_note.clone() {
                ctx.watched.insert(key);
            }
            ctx.synced = true;
            ui.data_status = STATUS_SYNCED.to_string();
        }
        EditorEventKind::Synced(synced) => {
            if ctx.synced != synced {
                ctx.synced = synced;
                ui.data_status = if synced { STATUS_SYNCED } else { STATUS_SYNCING }.to_string();
            }
        }
    }
}

/// A new entry in the history of one of the user's notes. The note does not
/// have to be the one on screen: an edit can still be in flight when the pane
/// switches away.
pub(crate) async fn on_history(
    svc: &Services,
    ctx: &mut SessionContext,
    key: &NoteKey,
    entry: HistoryEntry,
) -> Result<()> {
    let uid = ctx.user.uid.clone();
    let mounted = ctx.open_note.as_ref() == Some(key);
    if mounted && !ctx.editor_ready {
        tracing::debug!(%key, "history before the editor is ready");
        return Ok(());
    }
    if !mounted && !ctx.watched.contains(key) && !owns(svc, &uid, key).await? {
        return Ok(());
    }

    // 1. The name only depends on the leading characters
    if entry.offset < svc.config.name_length {
        let text = match ctx.editor.as_ref().filter(|_| mounted) {
            Some(editor) => editor.current_text().await?,
            None => svc.store.note_text(key).await?,
        };
        svc.store
            .set_note_name(key, &derive_name(&text, svc.config.name_length))
            .await?;
    }

    // 2. Most recent first
    svc.store
        .set_recency(&uid, key, Recency::from_timestamp(entry.timestamp))
        .await?;

    // 3. Re-sort the sidebar once typing pauses
    svc.list_refresh.call(());

    // 4. Search index
    search::index_note(svc, ctx, key).await
}

async fn owns(svc: &Services, uid: &UserId, key: &NoteKey) -> Result<bool> {
    Ok(svc.store.user_notes(uid).await?.iter().any(|(note, _)| note == key))
}
