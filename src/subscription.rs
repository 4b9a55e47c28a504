//! Subscription status, plans and purchase.

use std::sync::Arc;
use tracing::info;

use crate::api_errors::{ApiError, ApiResult};
use crate::auth::AuthSession;
use crate::models::{Subscription, SubscriptionPlan, SubscriptionStatus, SubscriptionType};

pub struct SubscriptionService {
    session: Arc<AuthSession>,
}

impl SubscriptionService {
    pub fn new(session: Arc<AuthSession>) -> Self {
        Self { session }
    }

    fn require_session(&self) -> ApiResult<()> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(ApiError::Auth("Not authenticated".to_string()))
        }
    }

    pub async fn status(&self) -> ApiResult<SubscriptionStatus> {
        self.require_session()?;
        self.session.check(self.session.client().subscription_status().await)
    }

    /// Available plans; public, no session needed
    pub async fn plans(&self) -> ApiResult<Vec<SubscriptionPlan>> {
        Ok(self.session.client().subscription_plans().await?.plans)
    }

    pub async fn create(&self, kind: SubscriptionType) -> ApiResult<Subscription> {
        self.require_session()?;
        let subscription = self.session.check(self.session.client().create_subscription(kind).await)?;
        info!(subscription_id = subscription.id, kind = kind.as_str(), "Subscription created");
        Ok(subscription)
    }

    /// Turn off auto-renewal of a subscription
    pub async fn cancel(&self, id: i64) -> ApiResult<()> {
        self.require_session()?;
        self.session.check(self.session.client().cancel_subscription(id).await)?;
        info!(subscription_id = id, "Subscription auto-renewal cancelled");
        Ok(())
    }
}
