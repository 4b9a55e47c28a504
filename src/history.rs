//! Query and scan history for the signed-in user.
//!
//! Every operation is gated on the auth session: while it is not authenticated
//! reads return an empty page and writes are skipped, without a network call.
//! A 401/403 from the backend invalidates the session.

use std::sync::Arc;
use tracing::{debug, info};

use crate::api_errors::ApiResult;
use crate::auth::AuthSession;
use crate::models::{HistoryPage, Page, ScanHistoryPage};

pub const DEFAULT_HISTORY_PAGE: Page = Page { limit: 20, offset: 0 };
pub const DEFAULT_SCAN_PAGE: Page = Page { limit: 10, offset: 0 };

pub struct HistoryService {
    session: Arc<AuthSession>,
}

impl HistoryService {
    pub fn new(session: Arc<AuthSession>) -> Self {
        Self { session }
    }

    pub async fn load(&self, page: Page) -> ApiResult<HistoryPage> {
        if !self.session.is_authenticated() {
            debug!("Skipping history load for unauthenticated session");
            return Ok(HistoryPage::default());
        }
        self.session.check(self.session.client().query_history(page).await)
    }

    /// Clear the whole query history; returns whether a request was made
    pub async fn clear(&self) -> ApiResult<bool> {
        if !self.session.is_authenticated() {
            return Ok(false);
        }
        let response = self.session.check(self.session.client().clear_history().await)?;
        info!(message = %response.message, "History cleared");
        Ok(true)
    }

    pub async fn delete(&self, id: i64) -> ApiResult<bool> {
        if !self.session.is_authenticated() {
            return Ok(false);
        }
        self.session.check(self.session.client().delete_history_item(id).await)?;
        Ok(true)
    }

    pub async fn scans(&self, page: Page) -> ApiResult<ScanHistoryPage> {
        if !self.session.is_authenticated() {
            return Ok(ScanHistoryPage::default());
        }
        self.session.check(self.session.client().scan_history(page).await)
    }
}
