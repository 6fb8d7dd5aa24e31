//! Search Index Manager: one index per user, persisted as a snapshot in the
//! user's record and rewritten after every indexed change.

use anyhow::Result;

use crate::app::Services;
use crate::index::SearchIndex;
use crate::notes_list;
use crate::session::SessionContext;
use crate::types::{NoteKey, UiState};

/// How the session's index came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    #[default]
    Unloaded,
    /// Restored from the persisted snapshot.
    Warm,
    /// Built from scratch; notes are indexed as they are announced.
    Cold,
}

/// Load the user's index, or build one when no usable snapshot exists.
pub(crate) async fn init(svc: &Services, ctx: &mut SessionContext) -> Result<()> {
    let uid = ctx.user.uid.clone();
    if let Some(snapshot) = svc.store.search_index(&uid).await? {
        match SearchIndex::deserialize(&snapshot) {
            Ok(index) => {
                tracing::info!(documents = index.len(), "search index restored");
                ctx.index = Some(index);
                ctx.index_mode = IndexMode::Warm;
                return Ok(());
            }
            Err(e) => tracing::warn!("{e:#}, rebuilding search index"),
        }
    }

    ctx.index = Some(SearchIndex::new()?);
    ctx.index_mode = IndexMode::Cold;
    // One pass over what exists now; later notes arrive through `on_note_added`.
    let notes = svc.store.user_notes(&uid).await?;
    tracing::info!(notes = notes.len(), "building search index");
    for (key, _) in notes {
        index_note(svc, ctx, &key).await?;
    }
    Ok(())
}

/// Re-index `key` from the stored document text and persist the whole index.
pub(crate) async fn index_note(svc: &Services, ctx: &mut SessionContext, key: &NoteKey) -> Result<()> {
    // Read straight from the store, independent of the mounted editor.
    let text = svc.store.note_text(key).await?;
    let Some(index) = ctx.index.as_mut() else {
        tracing::debug!(%key, "no search index loaded yet");
        return Ok(());
    };
    index.upsert(key, &text)?;
    let snapshot = index.serialize()?;
    svc.store.set_search_index(&ctx.user.uid, &snapshot).await
}

pub(crate) async fn on_note_added(svc: &Services, ctx: &mut SessionContext, key: &NoteKey) -> Result<()> {
    if ctx.index_mode != IndexMode::Cold {
        return Ok(());
    }
    index_note(svc, ctx, key).await
}

/// Debounced search box handler: show matches, or fall back to the full list
/// for queries too short to be useful.
pub(crate) async fn run(svc: &Services, ui: &mut UiState, ctx: &mut SessionContext, query: &str) -> Result<()> {
    let query = query.trim();
    if query.chars().count() >= svc.config.min_query_len {
        let hits: Vec<NoteKey> = match ctx.index.as_ref() {
            Some(index) => index.search(query)?.into_iter().map(|r| r.note_id).collect(),
            None => Vec::new(),
        };
        tracing::debug!(query, hits = hits.len(), "search");
        notes_list::render_results(svc, ui, ctx, &hits).await?;
        ui.notes_list.visible = false;
        ui.search_results.visible = true;
        ctx.search_active = true;
        return Ok(());
    }

    ctx.results.unbind();
    ui.search_results.clear();
    ui.search_results.visible = false;
    ui.notes_list.visible = true;
    ctx.search_active = false;
    let highlight = ctx.open_note.clone();
    notes_list::render(svc, ui, ctx, highlight.as_ref()).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::Command;
    use crate::store::Store;
    use crate::testing::{harness, signed_in, user};
    use crate::types::{Recency, TextEdit};

    async fn search_for(app: &mut crate::app::App, text: &str) {
        app.command(Command::SearchInput(text.to_string())).await;
        tokio::time::advance(Duration::from_millis(600)).await;
        app.settle().await;
    }

    #[tokio::test]
    async fn cold_start_backfills_existing_notes() {
        let h = harness();
        let uid = user().uid;
        h.store.ensure_user(&uid, "Ada").await.unwrap();
        for (key, text) in [("a", "apples and pears"), ("b", "meeting notes")] {
            let key = NoteKey::new(key);
            h.store.apply_edit(&key, &TextEdit::insert(0, text), 1).await.unwrap();
            h.store.set_recency(&uid, &key, Recency::from_timestamp(1)).await.unwrap();
        }

        let mut app = h.app;
        app.command(Command::ToggleSignIn).await;

        let ctx = app.sessions().current().unwrap();
        assert_eq!(ctx.index_mode(), IndexMode::Cold);
        let index = ctx.index().unwrap();
        assert!(index.contains(&NoteKey::new("a")));
        assert!(index.contains(&NoteKey::new("b")));

        let persisted = h.store.search_index(&uid).await.unwrap().unwrap();
        let restored = SearchIndex::deserialize(&persisted).unwrap();
        assert_eq!(restored.search("pears").unwrap()[0].note_id, NoteKey::new("a"));
    }

    #[tokio::test]
    async fn warm_start_uses_the_snapshot_verbatim() {
        let h = harness();
        let uid = user().uid;
        let key = NoteKey::new("z");
        h.store.ensure_user(&uid, "Ada").await.unwrap();
        h.store.apply_edit(&key, &TextEdit::insert(0, "current text"), 1).await.unwrap();
        h.store.set_recency(&uid, &key, Recency::from_timestamp(1)).await.unwrap();
        let mut stale = SearchIndex::new().unwrap();
        stale.upsert(&key, "zebra crossing").unwrap();
        h.store.set_search_index(&uid, &stale.serialize().unwrap()).await.unwrap();

        let mut app = h.app;
        app.command(Command::ToggleSignIn).await;

        let ctx = app.sessions().current().unwrap();
        assert_eq!(ctx.index_mode(), IndexMode::Warm);
        assert_eq!(ctx.index().unwrap().search("zebra").unwrap().len(), 1);
        assert!(ctx.index().unwrap().search("current").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_snapshot_is_rebuilt() {
        let h = harness();
        let uid = user().uid;
        h.store.ensure_user(&uid, "Ada").await.unwrap();
        h.store.set_search_index(&uid, "{broken").await.unwrap();

        let mut app = h.app;
        app.command(Command::ToggleSignIn).await;

        assert_eq!(app.sessions().current().unwrap().index_mode(), IndexMode::Cold);
    }

    #[tokio::test]
    async fn reindexing_keeps_one_document_per_note() {
        let (mut app, store) = signed_in().await;
        let key = app.sessions().current().unwrap().open_note.clone().unwrap();

        app.command(Command::Edit(TextEdit::insert(0, "shopping list"))).await;
        app.command(Command::Edit(TextEdit::delete(0, 13))).await;
        app.command(Command::Edit(TextEdit::insert(0, "meeting agenda"))).await;

        let index = app.sessions().current().unwrap().index().unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.search("shopping").unwrap().is_empty());
        assert_eq!(index.search("agenda").unwrap()[0].note_id, key);

        let persisted = store.search_index(&user().uid).await.unwrap().unwrap();
        assert_eq!(SearchIndex::deserialize(&persisted).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_queries_keep_the_notes_list() {
        let (mut app, _store) = signed_in().await;
        let holiday = app.sessions().current().unwrap().open_note.clone().unwrap();
        app.command(Command::Edit(TextEdit::insert(0, "Holiday plans"))).await;
        app.command(Command::NewNote).await;
        app.command(Command::Edit(TextEdit::insert(0, "Groceries"))).await;
        let groceries = app.sessions().current().unwrap().open_note.clone().unwrap();

        search_for(&mut app, "h").await;
        assert!(app.ui().notes_list.visible);
        assert!(!app.ui().search_results.visible);
        assert!(!app.sessions().current().unwrap().search_active());
        assert_eq!(app.ui().notes_list.selected(), Some(&groceries));

        search_for(&mut app, "ho").await;
        let ui = app.ui();
        assert!(!ui.notes_list.visible);
        assert!(ui.search_results.visible);
        let keys: Vec<_> = ui.search_results.items.iter().map(|i| i.key.clone()).collect();
        assert_eq!(keys, vec![holiday]);
        assert!(!ui.search_results.items[0].selected);
        assert_eq!(ui.search_results.items[0].label, "Holiday plans...");

        search_for(&mut app, "groc").await;
        assert_eq!(app.ui().search_results.selected(), Some(&groceries));

        search_for(&mut app, " ").await;
        assert!(app.ui().notes_list.visible);
        assert!(app.ui().search_results.items.is_empty());
        assert_eq!(app.sessions().current().unwrap().result_bindings().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_last_keystroke_is_searched() {
        let (mut app, _store) = signed_in().await;
        app.command(Command::Edit(TextEdit::insert(0, "alpha beta"))).await;

        app.command(Command::SearchInput("al".into())).await;
        tokio::time::advance(Duration::from_millis(200)).await;
        app.command(Command::SearchInput("a".into())).await;
        tokio::time::advance(Duration::from_millis(600)).await;
        app.settle().await;

        assert!(app.ui().notes_list.visible);
        assert!(app.ui().search_results.items.is_empty());
    }
}
