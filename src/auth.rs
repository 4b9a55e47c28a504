//! # Auth Session Module
//!
//! Maintains exactly one active identity for the lifetime of a session.
//!
//! # State Machine
//!
//! - **Uninitialized**: created, nothing attempted yet
//! - **Authenticating**: verifying a stored token or exchanging the init payload
//! - **Authenticated**: token stored and user known
//! - **Unauthenticated**: no token; the last attempt failed or the user logged out
//!
//! The session is the only writer of the access token. Token and state are updated
//! together under one lock, so a resolved session never holds a token without being
//! authenticated (or the reverse).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::api_errors::{ApiError, ApiResult};
use crate::client_config::ClientConfig;
use crate::http_client::ApiClient;
use crate::models::User;
use crate::token_store::{token_cell, TokenReader, TokenStore, TokenWriter};

/// Authentication state of a session
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Uninitialized,
    Authenticating,
    Authenticated(User),
    Unauthenticated,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    /// Whether the session reached a final state of an attempt
    pub fn is_resolved(&self) -> bool {
        matches!(self, AuthState::Authenticated(_) | AuthState::Unauthenticated)
    }
}

/// Auth session owning the access token
pub struct AuthSession {
    client: ApiClient,
    token: TokenWriter,
    store: Arc<dyn TokenStore>,
    init_data: String,
    state: Mutex<AuthState>,
    attempt_lock: tokio::sync::Mutex<()>,
    finished_attempts: AtomicU64,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("base_url", &self.client.base_url())
            .field("state", &self.state())
            .finish()
    }
}

impl AuthSession {
    /// Create a session around an existing client and the write half of its token cell
    pub fn new(
        client: ApiClient,
        token: TokenWriter,
        store: Arc<dyn TokenStore>,
        init_data: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token,
            store,
            init_data: init_data.into(),
            state: Mutex::new(AuthState::Uninitialized),
            attempt_lock: tokio::sync::Mutex::new(()),
            finished_attempts: AtomicU64::new(0),
        }
    }

    /// Build the token cell, the API client and the session in one go
    pub fn from_config(
        config: &ClientConfig,
        store: Arc<dyn TokenStore>,
        init_data: impl Into<String>,
    ) -> ApiResult<Self> {
        let (writer, reader) = token_cell();
        let client = ApiClient::new(config, reader)?;
        Ok(Self::new(client, writer, store, init_data))
    }

    /// Client sharing this session's token
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn token_reader(&self) -> TokenReader {
        self.token.reader()
    }

    pub fn state(&self) -> AuthState {
        self.lock_state().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        match &*self.lock_state() {
            AuthState::Authenticated(user) => Some(user.clone()),
            _ => None,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore the session at startup.
    ///
    /// A stored token is installed optimistically and verified with
    /// `/api/auth/me`; if it is rejected it is discarded and one fresh
    /// authentication is attempted. Errors end in `Unauthenticated` instead of
    /// being returned.
    pub async fn initialize(&self) -> AuthState {
        let _attempt = self.attempt_lock.lock().await;
        *self.lock_state() = AuthState::Authenticating;

        let stored = self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read stored token");
            None
        });

        if let Some(token) = stored {
            self.token.set(token);
            match self.client.current_user().await {
                Ok(user) => {
                    info!(user_id = user.id, "Restored session from stored token");
                    *self.lock_state() = AuthState::Authenticated(user);
                    self.finished_attempts.fetch_add(1, Ordering::SeqCst);
                    return self.state();
                }
                Err(e) => {
                    warn!(error = %e, "Stored token rejected, re-authenticating");
                    self.token.clear();
                    if let Err(e) = self.store.clear() {
                        warn!(error = %e, "Failed to clear stored token");
                    }
                }
            }
        }

        if let Err(e) = self.authenticate_locked().await {
            warn!(error = %e, "Authentication failed during startup");
        }
        self.state()
    }

    /// Exchange the init payload for a new access token.
    ///
    /// Attempts are serialized. A caller that waited behind an attempt which
    /// succeeded gets that attempt's user instead of logging in again.
    pub async fn authenticate(&self) -> ApiResult<User> {
        let seen = self.finished_attempts.load(Ordering::SeqCst);
        let _attempt = self.attempt_lock.lock().await;

        if self.finished_attempts.load(Ordering::SeqCst) != seen {
            if let Some(user) = self.user() {
                debug!(user_id = user.id, "Reusing result of concurrent authentication");
                return Ok(user);
            }
        }

        self.authenticate_locked().await
    }

    async fn authenticate_locked(&self) -> ApiResult<User> {
        *self.lock_state() = AuthState::Authenticating;
        let result = self.client.authenticate(&self.init_data).await;
        self.finished_attempts.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(response) if !response.access_token.is_empty() => {
                if let Err(e) = self.store.save(&response.access_token) {
                    warn!(error = %e, "Failed to persist access token");
                }

                let mut state = self.lock_state();
                self.token.set(response.access_token);
                *state = AuthState::Authenticated(response.user.clone());
                info!(user_id = response.user.id, "Authenticated");
                Ok(response.user)
            }
            Ok(_) => {
                self.reset_to_unauthenticated();
                Err(ApiError::Auth("Backend returned an empty access token".to_string()))
            }
            Err(e) => {
                self.reset_to_unauthenticated();
                Err(match e {
                    ApiError::Request { status, message } if status == 401 || status == 403 => {
                        ApiError::Auth(message)
                    }
                    other => other,
                })
            }
        }
    }

    fn reset_to_unauthenticated(&self) {
        let mut state = self.lock_state();
        self.token.clear();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored token");
        }
        *state = AuthState::Unauthenticated;
    }

    /// Drop the identity: clears the token in memory and storage. No network call.
    pub fn logout(&self) {
        self.reset_to_unauthenticated();
        info!("Logged out");
    }

    /// Forget a token the backend no longer accepts.
    ///
    /// The next `authenticate()` exchanges the init payload again.
    pub fn invalidate(&self) {
        self.reset_to_unauthenticated();
        warn!("Access token rejected, session invalidated");
    }

    /// Pass `result` through, invalidating the session on a 401/403
    pub fn check<T>(&self, result: ApiResult<T>) -> ApiResult<T> {
        if let Err(e) = &result {
            if e.is_unauthorized() && self.is_authenticated() {
                self.invalidate();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::MemoryTokenStore;

    fn offline_session(store: Arc<MemoryTokenStore>) -> AuthSession {
        // Port 9 (discard) is never answered; these tests must not reach the network
        let config = ClientConfig::with_api_url("http://127.0.0.1:9");
        AuthSession::from_config(&config, store, "test_data").unwrap()
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let session = offline_session(Arc::new(MemoryTokenStore::new()));
        assert_eq!(session.state(), AuthState::Uninitialized);
        assert!(!session.is_authenticated());
        assert!(session.user().is_none());
        assert!(!session.client().has_token());
    }

    #[test]
    fn test_logout_clears_token_synchronously() {
        let store = Arc::new(MemoryTokenStore::with_token("persisted"));
        let session = offline_session(Arc::clone(&store));
        session.token.set("persisted");

        session.logout();

        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(!session.client().has_token());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_unauthorized_result_invalidates_session() {
        let store = Arc::new(MemoryTokenStore::with_token("stale"));
        let session = offline_session(Arc::clone(&store));
        session.token.set("stale");
        *session.lock_state() = AuthState::Authenticated(User {
            id: 1,
            telegram_id: 100,
            first_name: None,
            last_name: None,
            username: None,
        });

        let not_found: ApiResult<()> = Err(ApiError::Request { status: 404, message: "gone".into() });
        assert!(session.check(not_found).is_err());
        assert!(session.is_authenticated());

        let rejected: ApiResult<()> = Err(ApiError::Request { status: 401, message: "expired".into() });
        assert!(session.check(rejected).is_err());
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(!session.client().has_token());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_auth_state_helpers() {
        assert!(!AuthState::Authenticating.is_resolved());
        assert!(AuthState::Unauthenticated.is_resolved());
        assert!(!AuthState::Unauthenticated.is_authenticated());
    }
}
