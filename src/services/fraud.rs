use crate::{
    config::{CheckoutSettings, MAX_ORDER_INTERVAL_SECS},
    entities::{address, blocked_identity, order, BlockKind, BlockedIdentity, Order},
    errors::ServiceError,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Select,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Block-list and per-phone order rate checks run before an order is priced.
///
/// The checks only read; two concurrent checkouts from the same phone can both
/// pass before either order is written.
#[derive(Clone)]
pub struct FraudGuard {
    db: Arc<DatabaseConnection>,
}

impl FraudGuard {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// `phone` must already be normalized.
    #[instrument(skip(self, settings))]
    pub async fn check(
        &self,
        phone: &str,
        user_id: Option<Uuid>,
        settings: &CheckoutSettings,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if self.is_blocked(phone, user_id).await? {
            warn!(phone, "Order attempt from blocked identity");
            return Err(ServiceError::Blocked(
                "Orders from this customer are not accepted".into(),
            ));
        }

        let since = now - Duration::hours(24);
        let recent = self.orders_from_phone(phone).filter(order::Column::CreatedAt.gte(since));
        let count = recent.count(&*self.db).await?;
        if count >= u64::from(settings.max_orders_per_day) {
            return Err(ServiceError::RateLimitExceeded(format!(
                "At most {} orders per day are allowed for one phone number",
                settings.max_orders_per_day
            )));
        }

        let latest = self
            .orders_from_phone(phone)
            .order_by_desc(order::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        if let Some(latest) = latest {
            let elapsed = now.signed_duration_since(latest.created_at);
            let interval = order_spacing(settings);
            if elapsed < interval {
                let wait = (interval - elapsed).num_seconds().max(1);
                return Err(ServiceError::RateLimitExceeded(format!(
                    "Please wait {} seconds before placing another order",
                    wait
                )));
            }
        }

        Ok(())
    }

    async fn is_blocked(&self, phone: &str, user_id: Option<Uuid>) -> Result<bool, ServiceError> {
        let mut identity = Condition::any().add(
            Condition::all()
                .add(blocked_identity::Column::Kind.eq(BlockKind::Phone))
                .add(blocked_identity::Column::Value.eq(phone)),
        );
        if let Some(user_id) = user_id {
            identity = identity.add(
                Condition::all()
                    .add(blocked_identity::Column::Kind.eq(BlockKind::User))
                    .add(blocked_identity::Column::Value.eq(user_id.to_string())),
            );
        }

        let hits = BlockedIdentity::find()
            .filter(blocked_identity::Column::IsActive.eq(true))
            .filter(identity)
            .count(&*self.db)
            .await?;
        Ok(hits > 0)
    }

    fn orders_from_phone(&self, phone: &str) -> Select<Order> {
        Order::find()
            .join(JoinType::InnerJoin, order::Relation::Address.def())
            .filter(address::Column::Phone.eq(phone))
    }
}

/// Required gap between two orders from one phone, capped at one week.
fn order_spacing(settings: &CheckoutSettings) -> Duration {
    let secs = settings.min_order_interval_secs.min(MAX_ORDER_INTERVAL_SECS);
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_is_capped_for_huge_settings() {
        for secs in [100_000_000_000_000_000, u64::MAX] {
            let settings = CheckoutSettings {
                min_order_interval_secs: secs,
                ..CheckoutSettings::default()
            };
            assert_eq!(order_spacing(&settings), Duration::weeks(1));
        }
    }

    #[test]
    fn spacing_follows_settings() {
        let settings = CheckoutSettings {
            min_order_interval_secs: 45,
            ..CheckoutSettings::default()
        };
        assert_eq!(order_spacing(&settings), Duration::seconds(45));
    }
}
