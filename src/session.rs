//! Session Manager: signed-out / signed-in(user) and the per-session context.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::app::{Event, Services};
use crate::editor::Editor;
use crate::identity::{AuthError, CREDENTIAL_COLLISION_NOTICE};
use crate::index::SearchIndex;
use crate::notes_list::Bindings;
use crate::search::IndexMode;
use crate::store::Store;
use crate::types::{
    EditorPane, ListPane, NoteKey, UiState, User, SIGN_IN_LABEL, SIGN_OUT_LABEL, STATUS_RESOLVING,
    STATUS_SIGNED_OUT,
};
use crate::{lifecycle, notes_list, search};

/// Which note a freshly signed-in session should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Open(NoteKey),
    CreateNew,
}

/// Everything owned by one signed-in session. Dropped as a whole on sign-out.
pub struct SessionContext {
    /// Bumped for every sign-in; async results carry it to detect staleness.
    pub epoch: u64,
    pub user: User,
    /// Set once the note to open has been resolved and mounted.
    pub resolved: bool,
    pub open_note: Option<NoteKey>,
    pub(crate) editor: Option<Box<dyn Editor>>,
    pub(crate) editor_ready: bool,
    /// Notes whose editor reported ready this session; their history keeps
    /// being followed after the pane moves on.
    pub(crate) watched: HashSet<NoteKey>,
    pub(crate) synced: bool,
    pub(crate) index: Option<SearchIndex>,
    pub(crate) index_mode: IndexMode,
    pub(crate) list: Bindings,
    pub(crate) results: Bindings,
    pub(crate) search_active: bool,
}

impl SessionContext {
    fn new(epoch: u64, user: User) -> Self {
        Self {
            epoch,
            user,
            resolved: false,
            open_note: None,
            editor: None,
            editor_ready: false,
            watched: HashSet::new(),
            synced: true,
            index: None,
            index_mode: IndexMode::default(),
            list: Bindings::default(),
            results: Bindings::default(),
            search_active: false,
        }
    }

    pub fn editor(&self) -> Option<&dyn Editor> {
        self.editor.as_deref()
    }

    pub fn index(&self) -> Option<&SearchIndex> {
        self.index.as_ref()
    }

    pub fn index_mode(&self) -> IndexMode {
        self.index_mode
    }

    pub fn list_bindings(&self) -> &Bindings {
        &self.list
    }

    pub fn result_bindings(&self) -> &Bindings {
        &self.results
    }

    pub fn search_active(&self) -> bool {
        self.search_active
    }
}

#[derive(Default)]
enum Session {
    #[default]
    SignedOut,
    SignedIn(SessionContext),
}

#[derive(Default)]
pub struct SessionManager {
    state: Session,
    last_epoch: u64,
}

impl SessionManager {
    pub fn is_signed_in(&self) -> bool {
        matches!(self.state, Session::SignedIn(_))
    }

    pub fn current(&self) -> Option<&SessionContext> {
        match &self.state {
            Session::SignedIn(ctx) => Some(ctx),
            Session::SignedOut => None,
        }
    }

    pub fn current_mut(&mut self) -> Option<&mut SessionContext> {
        match &mut self.state {
            Session::SignedIn(ctx) => Some(ctx),
            Session::SignedOut => None,
        }
    }

    /// The current session, but only once its note has been resolved.
    pub fn resolved_mut(&mut self) -> Option<&mut SessionContext> {
        self.current_mut().filter(|ctx| ctx.resolved)
    }

    fn begin(&mut self, user: User) -> &mut SessionContext {
        self.last_epoch += 1;
        self.state = Session::SignedIn(SessionContext::new(self.last_epoch, user));
        match &mut self.state {
            Session::SignedIn(ctx) => ctx,
            Session::SignedOut => unreachable!("session was just started"),
        }
    }

    fn end(&mut self) -> Option<SessionContext> {
        match std::mem::take(&mut self.state) {
            Session::SignedIn(ctx) => Some(ctx),
            Session::SignedOut => None,
        }
    }
}

/// Sign-in/out button. The button stays disabled until the provider reports
/// the resulting state (or the sign-in fails).
pub(crate) fn toggle_sign_in(svc: &Services, ui: &mut UiState, sessions: &SessionManager) {
    ui.sign_in_button.disabled = true;
    let identity = Arc::clone(&svc.identity);
    if sessions.is_signed_in() || identity.current_user().is_some() {
        tokio::spawn(async move {
            identity.sign_out().await;
        });
    } else {
        let inbox = svc.inbox.clone();
        tokio::spawn(async move {
            if let Err(err) = identity.sign_in().await {
                let _ = inbox.send(Event::SignInFailed(err));
            }
        });
    }
}

pub(crate) fn on_sign_in_failed(ui: &mut UiState, err: AuthError) {
    ui.sign_in_button.disabled = false;
    match err {
        AuthError::AccountExistsWithDifferentCredential { email } => {
            tracing::warn!(%email, "sign-in rejected: credential collision");
            ui.notice = Some(CREDENTIAL_COLLISION_NOTICE.to_string());
        }
        other => tracing::error!("{other}"),
    }
}

pub(crate) fn on_auth_changed(
    svc: &Services,
    ui: &mut UiState,
    sessions: &mut SessionManager,
    user: Option<User>,
) {
    ui.sign_in_button.disabled = false;
    let Some(user) = user else {
        if sessions.is_signed_in() {
            tracing::info!("signed out");
        }
        teardown(svc, ui, sessions);
        return;
    };

    if sessions.current().is_some_and(|ctx| ctx.user.uid == user.uid) {
        return;
    }
    if sessions.is_signed_in() {
        teardown(svc, ui, sessions);
    }

    ui.sign_in_status = format!("Signed in as {}", user.display_name);
    ui.sign_in_button.label = SIGN_OUT_LABEL.to_string();
    ui.data_status = STATUS_RESOLVING.to_string();
    ui.new_note_button.disabled = true;

    let epoch = sessions.begin(user.clone()).epoch;
    tracing::info!(uid = %user.uid, epoch, "signed in");

    let store = Arc::clone(&svc.store);
    let inbox = svc.inbox.clone();
    tokio::spawn(async move {
        let resolution = resolve(store.as_ref(), &user).await;
        let _ = inbox.send(Event::SessionResolved { epoch, resolution });
    });
}

/// Pick the note to open: `lastNote`, else the most recent owned note, else a
/// new one. First sign-in creates the user record.
async fn resolve(store: &dyn Store, user: &User) -> Result<Resolution> {
    let Some(record) = store.user(&user.uid).await? else {
        store.ensure_user(&user.uid, &user.display_name).await?;
        return Ok(Resolution::CreateNew);
    };
    if let Some(last) = record.last_note {
        return Ok(Resolution::Open(last));
    }
    Ok(match record.notes.into_iter().next() {
        Some((key, _)) => Resolution::Open(key),
        None => Resolution::CreateNew,
    })
}

pub(crate) async fn on_resolved(
    svc: &Services,
    ui: &mut UiState,
    sessions: &mut SessionManager,
    epoch: u64,
    resolution: Result<Resolution>,
) -> Result<()> {
    let Some(ctx) = sessions
        .current_mut()
        .filter(|ctx| ctx.epoch == epoch && !ctx.resolved)
    else {
        tracing::debug!(epoch, "dropping stale session resolution");
        return Ok(());
    };

    match resolution? {
        Resolution::Open(key) => lifecycle::open(svc, ui, ctx, &key).await?,
        Resolution::CreateNew => lifecycle::create_new(svc, ui, ctx).await?,
    }
    search::init(svc, ctx).await?;
    let highlight = ctx.open_note.clone();
    notes_list::render(svc, ui, ctx, highlight.as_ref()).await?;

    ctx.resolved = true;
    ui.new_note_button.disabled = false;
    Ok(())
}

/// Drop the session (if any) and reset every session-bound part of the UI.
pub(crate) fn teardown(svc: &Services, ui: &mut UiState, sessions: &mut SessionManager) {
    svc.list_refresh.cancel();
    svc.search.cancel();
    if let Some(mut ctx) = sessions.end() {
        if let Some(mut editor) = ctx.editor.take() {
            editor.dispose();
        }
        ctx.list.unbind();
        ctx.results.unbind();
    }
    ui.editor = EditorPane::default();
    ui.notes_list = ListPane { visible: true, items: Vec::new() };
    ui.search_results = ListPane::default();
    ui.search_input.clear();
    ui.sign_in_status = STATUS_SIGNED_OUT.to_string();
    ui.sign_in_button.label = SIGN_IN_LABEL.to_string();
    ui.data_status.clear();
    ui.new_note_button.disabled = true;
}
