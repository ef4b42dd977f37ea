use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::store::Store;
use crate::types::{Result, User};

/// Subscription access policy, consumed by the dispatcher but owned by the
/// account/billing side of the system.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn has_premium(&self, user_id: Uuid) -> Result<bool>;
}

/// Store-backed policy: premium is active while `premium_until` lies in
/// the future.
pub struct PremiumAccessPolicy {
    store: Arc<Store>,
}

impl PremiumAccessPolicy {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccessPolicy for PremiumAccessPolicy {
    async fn has_premium(&self, user_id: Uuid) -> Result<bool> {
        let user = self.store.user(user_id).await?;
        Ok(premium_active(&user))
    }
}

pub fn premium_active(user: &User) -> bool {
    user.premium_until.map(|until| until > Utc::now()).unwrap_or(false)
}

/// More than one active subscription requires premium.
pub fn is_locked(active_subscription_count: usize, has_premium: bool) -> bool {
    active_subscription_count > 1 && !has_premium
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_with_premium(until: Option<chrono::DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            chat_id: "1".to_string(),
            username: None,
            premium_until: until,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn premium_requires_future_expiry() {
        assert!(!premium_active(&user_with_premium(None)));
        assert!(!premium_active(&user_with_premium(Some(
            Utc::now() - Duration::hours(1)
        ))));
        assert!(premium_active(&user_with_premium(Some(
            Utc::now() + Duration::hours(1)
        ))));
    }

    #[test]
    fn single_subscription_never_locks() {
        assert!(!is_locked(0, false));
        assert!(!is_locked(1, false));
        assert!(is_locked(2, false));
        assert!(!is_locked(2, true));
    }
}
