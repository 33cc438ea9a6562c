use crate::{
    entities::{order, Order, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Payload of the payment gateway callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PaymentConfirmation {
    #[serde(default)]
    #[validate(length(min = 1, max = 100))]
    pub transaction_id: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Moves a prepaid order from `pending_payment` to `confirmed`.
    #[instrument(skip(self, confirmation))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<order::Model, ServiceError> {
        confirmation.validate()?;

        let existing = self.get_order(order_id).await?;
        let next = OrderStatus::Confirmed;
        if !existing.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: existing.status.to_string(),
                to: next.to_string(),
            });
        }

        let order_number = existing.order_number.clone();
        let keep_transaction = existing.transaction_id.clone();
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(next);
        active.transaction_id = Set(confirmation.transaction_id.or(keep_transaction));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(%order_id, "Payment confirmed");

        if let Err(e) = self.event_sender.publish(Event::OrderPaymentConfirmed {
            order_id,
            order_number,
        }) {
            warn!(%order_id, "Failed to publish OrderPaymentConfirmed: {}", e);
        }

        Ok(updated)
    }
}
