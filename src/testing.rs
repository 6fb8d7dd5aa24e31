//! Shared fixtures for the in-crate tests.

use std::sync::Arc;

use crate::app::{App, Command};
use crate::config::Config;
use crate::db::SqliteStore;
use crate::editor::{EditorBackend, StoreEditorBackend};
use crate::identity::LocalIdentityProvider;
use crate::store::Store;
use crate::types::{User, UserId};

pub(crate) struct Harness {
    pub app: App,
    pub store: Arc<SqliteStore>,
    pub identity: Arc<LocalIdentityProvider>,
}

pub(crate) fn user() -> User {
    User {
        uid: UserId::new("ada"),
        display_name: "Ada".to_string(),
        email: Some("ada@example.com".to_string()),
    }
}

pub(crate) fn config() -> Config {
    Config {
        db_path: ":memory:".into(),
        user_id: "ada".to_string(),
        display_name: "Ada".to_string(),
        ..Config::default()
    }
}

/// A signed-out app over a fresh in-memory store.
pub(crate) fn harness() -> Harness {
    harness_with(|store| -> Arc<dyn EditorBackend> { Arc::new(StoreEditorBackend::new(store)) })
}

/// Like [`harness`], with editors coming from `editors(store)`.
pub(crate) fn harness_with<F>(editors: F) -> Harness
where
    F: FnOnce(Arc<dyn Store>) -> Arc<dyn EditorBackend>,
{
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let identity = Arc::new(LocalIdentityProvider::new(user()));
    let editors = editors(store.clone());
    let app = App::new(config(), store.clone(), identity.clone(), editors);
    Harness { app, store, identity }
}

/// A brand-new user, signed in and settled on their first note.
pub(crate) async fn signed_in() -> (App, Arc<SqliteStore>) {
    let Harness { mut app, store, .. } = harness();
    app.command(Command::ToggleSignIn).await;
    (app, store)
}
