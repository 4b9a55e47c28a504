//! Session Manager module: one auth session, scan workflow and navigator per chat

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use teloxide::prelude::*;
use teloxide::types::User as TelegramUser;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::auth::{AuthSession, AuthState};
use crate::client_config::ClientConfig;
use crate::history::HistoryService;
use crate::literature::LiteratureService;
use crate::models::ImageFile;
use crate::router::{Navigator, Page};
use crate::scan_workflow::{ScanOutcome, ScanWorkflow};
use crate::subscription::SubscriptionService;
use crate::token_store::{FileTokenStore, TokenStore};

/// Everything one chat needs to talk to the backend
pub struct ChatContext {
    pub session: Arc<AuthSession>,
    pub workflow: ScanWorkflow,
    pub history: HistoryService,
    pub literature: LiteratureService,
    pub subscriptions: SubscriptionService,
    navigator: Mutex<Navigator>,
    last_image: Mutex<Option<ImageFile>>,
}

impl ChatContext {
    pub fn new(session: Arc<AuthSession>, config: &ClientConfig) -> Self {
        Self {
            workflow: ScanWorkflow::for_session(Arc::clone(&session), config),
            history: HistoryService::new(Arc::clone(&session)),
            literature: LiteratureService::new(session.client().clone()),
            subscriptions: SubscriptionService::new(Arc::clone(&session)),
            navigator: Mutex::new(Navigator::new()),
            last_image: Mutex::new(None),
            session,
        }
    }

    /// Run `f` against this chat's navigator
    pub fn navigate<R>(&self, f: impl FnOnce(&mut Navigator) -> R) -> R {
        let mut navigator = self.navigator.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut navigator)
    }

    /// Keep the submitted image so a failed scan can be retried
    pub fn remember_image(&self, file: ImageFile) {
        *self.last_image.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
    }

    pub fn last_image(&self) -> Option<ImageFile> {
        self.last_image.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn forget_image(&self) {
        self.last_image.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Show `outcome` and drop the kept image unless a retry will be offered
    pub fn finish_scan(&self, outcome: &ScanOutcome) -> Page {
        if !outcome.is_retryable() {
            self.forget_image();
        }
        self.navigate(|nav| nav.apply(outcome).clone())
    }

    /// Authenticate again if the session lost its identity.
    ///
    /// Services invalidate the session when the backend rejects its token,
    /// so after a 401/403 this logs in once more.
    pub async fn ensure_authenticated(&self) -> bool {
        if self.session.is_authenticated() {
            return true;
        }
        match self.session.authenticate().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Re-authentication failed");
                false
            }
        }
    }
}

/// Init payload the bot hands to `/api/auth` on behalf of a Telegram user.
///
/// Mirrors the Web App `initData` query string (`user=<json>`). It carries no
/// signature, so only a backend running in development mode accepts it.
pub fn init_payload_for(user: &TelegramUser) -> String {
    let user_json = serde_json::json!({
        "id": user.id.0,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "username": user.username,
        "language_code": user.language_code,
    });

    let mut url = match reqwest::Url::parse("tg://init") {
        Ok(url) => url,
        Err(_) => return format!("user={user_json}"),
    };
    url.query_pairs_mut()
        .append_pair("user", &user_json.to_string())
        .append_pair("auth_date", &chrono::Utc::now().timestamp().to_string());
    url.query().unwrap_or_default().to_string()
}

/// Lazily created chat contexts
pub struct SessionRegistry {
    config: ClientConfig,
    contexts: tokio::sync::Mutex<HashMap<ChatId, Arc<OnceCell<Arc<ChatContext>>>>>,
}

impl SessionRegistry {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            contexts: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Context for `chat_id`, restoring or creating its session on first use
    pub async fn context_for(&self, chat_id: ChatId, user: &TelegramUser) -> Result<Arc<ChatContext>> {
        let cell = {
            let mut contexts = self.contexts.lock().await;
            Arc::clone(contexts.entry(chat_id).or_default())
        };

        let context = cell
            .get_or_try_init(|| async {
                let store: Arc<dyn TokenStore> =
                    Arc::new(FileTokenStore::for_chat(&self.config.data_dir, chat_id.0));
                let session = Arc::new(AuthSession::from_config(
                    &self.config,
                    store,
                    init_payload_for(user),
                )?);

                match session.initialize().await {
                    AuthState::Authenticated(backend_user) => {
                        info!(user_id = %chat_id, backend_user_id = backend_user.id, "Chat session ready");
                    }
                    state => {
                        warn!(user_id = %chat_id, state = ?state, "Chat session started without authentication");
                    }
                }

                Ok::<_, anyhow::Error>(Arc::new(ChatContext::new(session, &self.config)))
            })
            .await?;

        debug!(user_id = %chat_id, "Resolved chat context");
        Ok(Arc::clone(context))
    }
}
