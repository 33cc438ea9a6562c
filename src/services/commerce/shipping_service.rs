use crate::{
    config::CheckoutSettings,
    entities::{delivery_zone, DeliveryZone},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::instrument;

/// Shipping method hint meaning the customer collects the parcel in store.
pub const PICKUP_METHOD: &str = "pickup";

/// Resolves shipping fees from the delivery zone table.
#[derive(Clone)]
pub struct ShippingService {
    db: Arc<DatabaseConnection>,
}

impl ShippingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn active_zones(&self) -> Result<Vec<delivery_zone::Model>, ServiceError> {
        Ok(DeliveryZone::find()
            .filter(delivery_zone::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?)
    }
}

/// Shipping fee for a destination.
///
/// Pickup is free. A zone whose district matches (ignoring case) sets the fee;
/// otherwise the default fee applies, waived once the subtotal reaches the
/// free-shipping threshold.
pub fn resolve_shipping_cost(
    shipping_method: Option<&str>,
    district: &str,
    zones: &[delivery_zone::Model],
    subtotal: Decimal,
    settings: &CheckoutSettings,
) -> Decimal {
    if shipping_method.is_some_and(|m| m.trim().eq_ignore_ascii_case(PICKUP_METHOD)) {
        return Decimal::ZERO;
    }

    let district = district.trim();
    if let Some(zone) = zones
        .iter()
        .find(|z| z.is_active && z.district.trim().eq_ignore_ascii_case(district))
    {
        return zone.cost;
    }

    match settings.free_shipping_threshold {
        Some(threshold) if subtotal >= threshold => Decimal::ZERO,
        _ => settings.default_shipping_cost,
    }
}
