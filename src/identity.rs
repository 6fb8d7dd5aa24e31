use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::types::User;

/// Shown when the account is already registered through another provider.
pub const CREDENTIAL_COLLISION_NOTICE: &str =
    "You have already signed up with a different auth provider for that email.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("account {email} exists with a different credential")]
    AccountExistsWithDifferentCredential { email: String },
    #[error("sign-in popup was closed before completing")]
    PopupClosed,
    #[error("sign-in failed: {0}")]
    Other(String),
}

/// Identity provider seam. State changes are delivered serially through
/// [`IdentityProvider::subscribe`]; `sign_in`/`sign_out` only report failures.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self) -> Result<User, AuthError>;
    async fn sign_out(&self);
    fn current_user(&self) -> Option<User>;
    fn subscribe(&self) -> watch::Receiver<Option<User>>;
}

/// Provider backed by one configured account. Used by the terminal
/// front-end and by tests, which can inject a failure for the next sign-in.
pub struct LocalIdentityProvider {
    account: User,
    state: watch::Sender<Option<User>>,
    next_failure: Mutex<Option<AuthError>>,
}

impl LocalIdentityProvider {
    pub fn new(account: User) -> Self {
        let (state, _) = watch::channel(None);
        Self { account, state, next_failure: Mutex::new(None) }
    }

    /// Make the next `sign_in` fail with `error`.
    pub fn fail_next_sign_in(&self, error: AuthError) {
        *self.next_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self) -> Result<User, AuthError> {
        let failure = self
            .next_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(err) = failure {
            return Err(err);
        }
        self.state.send_replace(Some(self.account.clone()));
        Ok(self.account.clone())
    }

    async fn sign_out(&self) {
        self.state.send_replace(None);
    }

    fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn ada() -> User {
        User { uid: UserId::new("ada"), display_name: "Ada".into(), email: Some("ada@example.com".into()) }
    }

    #[tokio::test]
    async fn sign_in_and_out_publish_state() {
        let provider = LocalIdentityProvider::new(ada());
        let mut rx = provider.subscribe();

        provider.sign_in().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().clone(), Some(ada()));

        provider.sign_out().await;
        assert_eq!(rx.borrow_and_update().clone(), None);
        assert!(provider.current_user().is_none());
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let provider = LocalIdentityProvider::new(ada());
        provider.fail_next_sign_in(AuthError::AccountExistsWithDifferentCredential {
            email: "ada@example.com".into(),
        });

        let err = provider.sign_in().await.unwrap_err();
        assert!(matches!(err, AuthError::AccountExistsWithDifferentCredential { .. }));
        assert!(provider.current_user().is_none());
        assert!(provider.sign_in().await.is_ok());
    }
}
