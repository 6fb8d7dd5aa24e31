//! Notes List Renderer: the sidebar of a user's notes, most recent first.
//!
//! Each rendered item keeps its own live binding to its note's name, so a
//! rename touches exactly one item.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::app::Services;
use crate::session::SessionContext;
use crate::types::{ListItem, NoteKey, Recency, UiState};

/// Live bindings of a rendered pane.
#[derive(Debug, Default)]
pub struct Bindings {
    keys: HashSet<NoteKey>,
    /// Whether newly added notes are appended to the pane.
    follow_added: bool,
    highlight: Option<NoteKey>,
}

impl Bindings {
    pub fn is_bound(&self, key: &NoteKey) -> bool {
        self.keys.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn follows_added(&self) -> bool {
        self.follow_added
    }

    fn bind(&mut self, key: NoteKey) {
        self.keys.insert(key);
    }

    /// Drop every binding. Returns how many were live.
    pub(crate) fn unbind(&mut self) -> usize {
        let dropped = self.keys.len();
        self.keys.clear();
        self.follow_added = false;
        self.highlight = None;
        dropped
    }
}

/// Build one list item, labelled with the note's name (or its key until it has one).
pub(crate) async fn item(svc: &Services, key: &NoteKey, recency: Recency, selected: bool) -> Result<ListItem> {
    let label = svc
        .store
        .note_name(key)
        .await?
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| key.to_string());
    Ok(ListItem { key: key.clone(), label, selected, recency })
}

/// Re-render the notes list from scratch, marking `highlight` as selected.
pub(crate) async fn render(
    svc: &Services,
    ui: &mut UiState,
    ctx: &mut SessionContext,
    highlight: Option<&NoteKey>,
) -> Result<()> {
    // Unsubscribe before clearing, so nothing from the old render lands in the new one.
    let dropped = ctx.list.unbind();
    ui.notes_list.clear();

    let notes = svc.store.user_notes(&ctx.user.uid).await?;
    for (key, recency) in notes {
        let selected = highlight == Some(&key);
        ui.notes_list.items.push(item(svc, &key, recency, selected).await?);
        ctx.list.bind(key);
    }
    ctx.list.follow_added = true;
    ctx.list.highlight = highlight.cloned();
    tracing::debug!(bound = ctx.list.len(), dropped, "notes list rendered");
    Ok(())
}

/// Render `hits` into the search-results pane, replacing its previous bindings.
pub(crate) async fn render_results(
    svc: &Services,
    ui: &mut UiState,
    ctx: &mut SessionContext,
    hits: &[NoteKey],
) -> Result<()> {
    ctx.results.unbind();
    ui.search_results.clear();

    let recency: HashMap<NoteKey, Recency> = svc.store.user_notes(&ctx.user.uid).await?.into_iter().collect();
    for key in hits {
        let selected = ctx.open_note.as_ref() == Some(key);
        let value = recency.get(key).copied().unwrap_or(Recency::from_stored(0));
        ui.search_results.items.push(item(svc, key, value, selected).await?);
        ctx.results.bind(key.clone());
    }
    tracing::debug!(bound = ctx.results.len(), "search results rendered");
    Ok(())
}

/// Name binding: update every rendered item for `key`.
pub(crate) fn on_name_changed(ui: &mut UiState, ctx: &SessionContext, key: &NoteKey, name: &str) {
    if name.is_empty() {
        return;
    }
    if ctx.list.is_bound(key) {
        if let Some(item) = ui.notes_list.item_mut(key) {
            item.label = name.to_string();
        }
    }
    if ctx.results.is_bound(key) {
        if let Some(item) = ui.search_results.item_mut(key) {
            item.label = name.to_string();
        }
    }
}

/// A note appeared in the user's mapping: slot it into the rendered list.
pub(crate) async fn on_note_added(
    svc: &Services,
    ui: &mut UiState,
    ctx: &mut SessionContext,
    key: &NoteKey,
    recency: Recency,
) -> Result<()> {
    if !ctx.list.follow_added || ui.notes_list.contains(key) {
        return Ok(());
    }
    let selected = ctx.list.highlight.as_ref() == Some(key);
    ui.notes_list.insert_ordered(item(svc, key, recency, selected).await?);
    ctx.list.bind(key.clone());
    Ok(())
}

/// Keep the item's sort key current. Re-sorting waits for the next render.
pub(crate) fn on_recency_changed(ui: &mut UiState, key: &NoteKey, recency: Recency) {
    if let Some(item) = ui.notes_list.item_mut(key) {
        item.recency = recency;
    }
}

pub(crate) fn mark_selected(ui: &mut UiState, key: &NoteKey) {
    for item in ui.notes_list.items.iter_mut().chain(ui.search_results.items.iter_mut()) {
        item.selected = &item.key == key;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::{Command, Event};
    use crate::store::Store;
    use crate::testing::{signed_in, user};
    use crate::types::{now_ms, TextEdit};

    #[tokio::test]
    async fn rerender_replaces_bindings_instead_of_stacking_them() {
        let (mut app, store) = signed_in().await;
        store.set_recency(&user().uid, &NoteKey::new("extra"), Recency::from_timestamp(1)).await.unwrap();
        app.settle().await;
        assert_eq!(app.ui().notes_list.items.len(), 2);

        for _ in 0..3 {
            app.inject(Event::RefreshList);
        }
        app.settle().await;

        let ctx = app.sessions().current().unwrap();
        assert_eq!(app.ui().notes_list.items.len(), 2);
        assert_eq!(ctx.list_bindings().len(), 2);
        assert!(ctx.list_bindings().follows_added());
    }

    #[tokio::test]
    async fn names_update_only_their_own_item() {
        let (mut app, store) = signed_in().await;
        let uid = user().uid;
        let other = NoteKey::new("other");
        store.set_recency(&uid, &other, Recency::from_timestamp(1)).await.unwrap();
        app.settle().await;

        store.set_note_name(&other, "Renamed elsewhere...").await.unwrap();
        app.settle().await;

        let labels: Vec<_> = app.ui().notes_list.items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"Renamed elsewhere..."));
        assert_eq!(labels.iter().filter(|l| **l == "Renamed elsewhere...").count(), 1);

        // Empty names never blank out a label.
        store.set_note_name(&other, "").await.unwrap();
        app.settle().await;
        let item = app.ui().notes_list.items.iter().find(|i| i.key == other).unwrap();
        assert_eq!(item.label, "Renamed elsewhere...");
    }

    #[tokio::test]
    async fn a_rename_pending_ahead_of_the_addition_is_not_lost() {
        let (mut app, store) = signed_in().await;
        let late = NoteKey::new("late");

        // Both events wait in the store queue; the name arrives first.
        store.set_note_name(&late, "Named before listed...").await.unwrap();
        store.set_recency(&user().uid, &late, Recency::from_timestamp(1)).await.unwrap();
        app.settle().await;

        let items = &app.ui().notes_list.items;
        assert_eq!(items.iter().filter(|i| i.key == late).count(), 1);
        let item = items.iter().find(|i| i.key == late).unwrap();
        assert_eq!(item.label, "Named before listed...");
        assert!(app.sessions().current().unwrap().list_bindings().is_bound(&late));
    }

    #[tokio::test]
    async fn unknown_names_fall_back_to_the_key() {
        let (mut app, store) = signed_in().await;
        let other = NoteKey::new("nameless");
        store.set_recency(&user().uid, &other, Recency::from_timestamp(1)).await.unwrap();
        app.settle().await;

        let item = app.ui().notes_list.items.iter().find(|i| i.key == other).unwrap();
        assert_eq!(item.label, "nameless");
        assert!(!item.selected);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_reorder_the_list_after_the_quiet_period() {
        let (mut app, store) = signed_in().await;
        let uid = user().uid;
        let first = app.sessions().current().unwrap().open_note.clone().unwrap();
        let newer = NoteKey::new("newer");
        store
            .set_recency(&uid, &newer, Recency::from_timestamp(now_ms() + 60_000))
            .await
            .unwrap();
        app.settle().await;
        assert_eq!(app.ui().notes_list.items[0].key, newer);

        // Push it back in time; the rendered order only catches up on refresh.
        store.set_recency(&uid, &newer, Recency::from_timestamp(0)).await.unwrap();
        app.command(Command::Edit(TextEdit::insert(0, "bump"))).await;
        assert_eq!(app.ui().notes_list.items[0].key, newer);

        tokio::time::advance(Duration::from_millis(600)).await;
        app.settle().await;
        assert_eq!(app.ui().notes_list.items[0].key, first);
        assert_eq!(app.ui().notes_list.selected(), Some(&first));
    }
}
