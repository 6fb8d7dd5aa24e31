//! The reconciliation loop.
//!
//! Every input (user commands, identity changes, store notifications, editor
//! events, debounced timers, background results) becomes an [`Event`] and is
//! handled one at a time by [`App`], which owns the session and the UI model.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::Config;
use crate::debounce::Debounced;
use crate::editor::{EditorBackend, EditorEvent, EditorEventSink};
use crate::identity::{AuthError, IdentityProvider};
use crate::session::{Resolution, SessionManager};
use crate::store::{Store, StoreEvent};
use crate::types::{NoteKey, TextEdit, UiState, User};
use crate::{lifecycle, notes_list, search, session};

/// User-initiated actions, i.e. what the buttons, list items and search box do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToggleSignIn,
    NewNote,
    /// A click on a list or search-result item.
    OpenNote(NoteKey),
    Edit(TextEdit),
    SearchInput(String),
    DismissNotice,
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),
    AuthChanged(Option<User>),
    SignInFailed(AuthError),
    Store(StoreEvent),
    StoreLagged(u64),
    Editor(EditorEvent),
    SessionResolved { epoch: u64, resolution: Result<Resolution> },
    RefreshList,
    RunSearch(String),
    BackgroundError(String),
}

/// Collaborators and channels shared by every component.
pub struct Services {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub editors: Arc<dyn EditorBackend>,
    pub config: Config,
    pub(crate) inbox: mpsc::UnboundedSender<Event>,
    pub(crate) editor_events: EditorEventSink,
    pub(crate) list_refresh: Debounced<()>,
    pub(crate) search: Debounced<String>,
}

/// Cloneable sender for [`Command`]s.
#[derive(Clone)]
pub struct AppHandle {
    inbox: mpsc::UnboundedSender<Event>,
}

impl AppHandle {
    /// Queue a command. Returns false once the app has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.inbox.send(Event::Command(command)).is_ok()
    }
}

pub struct App {
    services: Services,
    ui: UiState,
    sessions: SessionManager,
    inbox: mpsc::UnboundedReceiver<Event>,
    editor_rx: mpsc::UnboundedReceiver<EditorEvent>,
    store_rx: broadcast::Receiver<StoreEvent>,
    identity_rx: watch::Receiver<Option<User>>,
    ui_tx: watch::Sender<UiState>,
}

enum Incoming {
    Event(Event),
    Closed,
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        editors: Arc<dyn EditorBackend>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (editor_events, editor_rx) = mpsc::unbounded_channel();
        let store_rx = store.subscribe();
        let mut identity_rx = identity.subscribe();

        let refresh_tx = inbox_tx.clone();
        let list_refresh = Debounced::trailing(config.list_refresh_debounce, move |_: ()| {
            let _ = refresh_tx.send(Event::RefreshList);
        });
        let search_tx = inbox_tx.clone();
        let search = Debounced::trailing(config.search_debounce, move |query: String| {
            let _ = search_tx.send(Event::RunSearch(query));
        });

        // The provider's current state is delivered like any later change.
        let current = identity_rx.borrow_and_update().clone();
        let _ = inbox_tx.send(Event::AuthChanged(current));

        let ui = UiState::default();
        let (ui_tx, _) = watch::channel(ui.clone());
        Self {
            services: Services {
                store,
                identity,
                editors,
                config,
                inbox: inbox_tx,
                editor_events,
                list_refresh,
                search,
            },
            ui,
            sessions: SessionManager::default(),
            inbox,
            editor_rx,
            store_rx,
            identity_rx,
            ui_tx,
        }
    }

    pub fn handle(&self) -> AppHandle {
        AppHandle { inbox: self.services.inbox.clone() }
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    /// Snapshot stream, updated after every handled event.
    pub fn subscribe_ui(&self) -> watch::Receiver<UiState> {
        self.ui_tx.subscribe()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[cfg(test)]
    pub(crate) fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, event: Event) {
        let _ = self.services.inbox.send(event);
    }

    /// Queue `command` and process everything it sets off.
    pub async fn command(&mut self, command: Command) {
        let _ = self.services.inbox.send(Event::Command(command));
        self.settle().await;
    }

    /// Drive the loop until `Command::Shutdown` or until a source closes.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let incoming = tokio::select! {
                biased;
                Some(ev) = self.editor_rx.recv() => Incoming::Event(Event::Editor(ev)),
                changed = self.identity_rx.changed() => match changed {
                    Ok(()) => Incoming::Event(Event::AuthChanged(self.identity_rx.borrow_and_update().clone())),
                    Err(_) => Incoming::Closed,
                },
                Some(ev) = self.inbox.recv() => Incoming::Event(ev),
                received = self.store_rx.recv() => match received {
                    Ok(ev) => Incoming::Event(Event::Store(ev)),
                    Err(RecvError::Lagged(n)) => Incoming::Event(Event::StoreLagged(n)),
                    Err(RecvError::Closed) => Incoming::Closed,
                },
            };
            match incoming {
                Incoming::Event(Event::Command(Command::Shutdown)) | Incoming::Closed => break,
                Incoming::Event(event) => self.process(event).await,
            }
        }
        session::teardown(&self.services, &mut self.ui, &mut self.sessions);
        self.ui_tx.send_replace(self.ui.clone());
        tracing::info!("app loop stopped");
        Ok(())
    }

    /// Handle everything that is ready now, including work that spawned tasks
    /// finish while we yield. Timers still pending are left alone.
    pub async fn settle(&mut self) {
        let mut idle_rounds = 0;
        while idle_rounds < 4 {
            match self.try_next() {
                Some(Event::Command(Command::Shutdown)) => {}
                Some(event) => {
                    idle_rounds = 0;
                    self.process(event).await;
                }
                None => {
                    idle_rounds += 1;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Same priority order as `run`: editor, identity, inbox, store.
    fn try_next(&mut self) -> Option<Event> {
        if let Ok(ev) = self.editor_rx.try_recv() {
            return Some(Event::Editor(ev));
        }
        if self.identity_rx.has_changed().unwrap_or(false) {
            return Some(Event::AuthChanged(self.identity_rx.borrow_and_update().clone()));
        }
        if let Ok(ev) = self.inbox.try_recv() {
            return Some(ev);
        }
        match self.store_rx.try_recv() {
            Ok(ev) => Some(Event::Store(ev)),
            Err(TryRecvError::Lagged(n)) => Some(Event::StoreLagged(n)),
            Err(_) => None,
        }
    }

    async fn process(&mut self, event: Event) {
        tracing::debug!(?event, "reconcile");
        if let Err(e) = self.reconcile(event).await {
            tracing::error!("{e:#}");
            self.ui.data_status = format!("Error: {e}");
        }
        self.ui_tx.send_replace(self.ui.clone());
    }

    async fn reconcile(&mut self, event: Event) -> Result<()> {
        let Self { services: svc, ui, sessions, .. } = self;
        match event {
            Event::Command(command) => handle_command(svc, ui, sessions, command).await,
            Event::AuthChanged(user) => {
                session::on_auth_changed(svc, ui, sessions, user);
                Ok(())
            }
            Event::SignInFailed(err) => {
                session::on_sign_in_failed(ui, err);
                Ok(())
            }
            Event::SessionResolved { epoch, resolution } => {
                session::on_resolved(svc, ui, sessions, epoch, resolution).await
            }
            Event::Editor(ev) => {
                if let Some(ctx) = sessions.current_mut() {
                    lifecycle::on_editor_event(ui, ctx, ev);
                }
                Ok(())
            }
            Event::Store(ev) => match sessions.resolved_mut() {
                Some(ctx) => on_store_event(svc, ui, ctx, ev).await,
                None => Ok(()),
            },
            Event::StoreLagged(missed) => {
                tracing::warn!(missed, "store notifications lagged, re-rendering");
                match sessions.resolved_mut() {
                    Some(ctx) => {
                        let highlight = ctx.open_note.clone();
                        notes_list::render(svc, ui, ctx, highlight.as_ref()).await
                    }
                    None => Ok(()),
                }
            }
            Event::RefreshList => match sessions.resolved_mut() {
                Some(ctx) => {
                    let highlight = ctx.open_note.clone();
                    notes_list::render(svc, ui, ctx, highlight.as_ref()).await
                }
                None => Ok(()),
            },
            Event::RunSearch(query) => match sessions.resolved_mut() {
                Some(ctx) => search::run(svc, ui, ctx, &query).await,
                None => Ok(()),
            },
            Event::BackgroundError(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

async fn handle_command(
    svc: &Services,
    ui: &mut UiState,
    sessions: &mut SessionManager,
    command: Command,
) -> Result<()> {
    match command {
        Command::ToggleSignIn => {
            session::toggle_sign_in(svc, ui, sessions);
            Ok(())
        }
        Command::DismissNotice => {
            ui.notice = None;
            Ok(())
        }
        Command::Shutdown => Ok(()),
        Command::NewNote => match sessions.resolved_mut() {
            Some(ctx) => lifecycle::create_new(svc, ui, ctx).await,
            None => {
                tracing::debug!("new note ignored: no resolved session");
                Ok(())
            }
        },
        Command::OpenNote(key) => match sessions.resolved_mut() {
            Some(ctx) => lifecycle::open(svc, ui, ctx, &key).await,
            None => Ok(()),
        },
        Command::Edit(edit) => match sessions.resolved_mut() {
            Some(ctx) => lifecycle::edit(ctx, edit).await,
            None => Ok(()),
        },
        Command::SearchInput(text) => {
            ui.search_input = text.clone();
            if sessions.resolved_mut().is_some() {
                svc.search.call(text);
            }
            Ok(())
        }
    }
}

async fn on_store_event(
    svc: &Services,
    ui: &mut UiState,
    ctx: &mut session::SessionContext,
    event: StoreEvent,
) -> Result<()> {
    match event {
        StoreEvent::HistoryAppended { key, entry } => lifecycle::on_history(svc, ctx, &key, entry).await,
        StoreEvent::NameChanged { key, name } => {
            notes_list::on_name_changed(ui, ctx, &key, &name);
            Ok(())
        }
        StoreEvent::NoteAdded { uid, key, recency } if uid == ctx.user.uid => {
            notes_list::on_note_added(svc, ui, ctx, &key, recency).await?;
            search::on_note_added(svc, ctx, &key).await
        }
        StoreEvent::RecencyChanged { uid, key, recency } if uid == ctx.user.uid => {
            notes_list::on_recency_changed(ui, &key, recency);
            Ok(())
        }
        StoreEvent::LastNoteChanged { uid, key } if uid == ctx.user.uid => {
            notes_list::render(svc, ui, ctx, Some(&key)).await
        }
        _ => Ok(()),
    }
}
