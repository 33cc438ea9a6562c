use crate::{
    config::CheckoutSettings,
    entities::{store_setting, StoreSetting},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{instrument, warn};
use validator::Validate;

pub const MAX_CART_ITEMS: &str = "max_cart_items";
pub const MAX_ORDERS_PER_DAY: &str = "max_orders_per_day";
pub const MIN_ORDER_INTERVAL_SECS: &str = "min_order_interval_secs";
pub const DEFAULT_SHIPPING_COST: &str = "default_shipping_cost";
pub const FREE_SHIPPING_THRESHOLD: &str = "free_shipping_threshold";
pub const COD_SURCHARGE: &str = "cod_surcharge";

/// Produces the checkout settings in force for a request.
///
/// Values come from `AppConfig.checkout`, overridden by rows of the
/// `store_settings` table that parse cleanly.
#[derive(Clone)]
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
    defaults: CheckoutSettings,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>, defaults: CheckoutSettings) -> Self {
        Self { db, defaults }
    }

    #[instrument(skip(self))]
    pub async fn checkout_settings(&self) -> Result<CheckoutSettings, ServiceError> {
        let rows = StoreSetting::find().all(&*self.db).await?;
        Ok(apply_overrides(self.defaults.clone(), &rows))
    }
}

/// Overlays stored key/value rows on `settings`.
///
/// Unknown keys, unparseable values and values that would leave the settings
/// outside their validated ranges are ignored.
pub fn apply_overrides(
    mut settings: CheckoutSettings,
    rows: &[store_setting::Model],
) -> CheckoutSettings {
    for row in rows {
        let value = row.value.trim();
        let mut candidate = settings.clone();
        let applied = match row.key.as_str() {
            MAX_CART_ITEMS => parse_into(value, &mut candidate.max_cart_items),
            MAX_ORDERS_PER_DAY => parse_into(value, &mut candidate.max_orders_per_day),
            MIN_ORDER_INTERVAL_SECS => parse_into(value, &mut candidate.min_order_interval_secs),
            DEFAULT_SHIPPING_COST => {
                parse_amount(value).map(|v| candidate.default_shipping_cost = v)
            }
            COD_SURCHARGE => parse_amount(value).map(|v| candidate.cod_surcharge = v),
            FREE_SHIPPING_THRESHOLD => {
                if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    candidate.free_shipping_threshold = None;
                    Some(())
                } else {
                    parse_amount(value).map(|v| candidate.free_shipping_threshold = Some(v))
                }
            }
            _ => continue,
        };

        if applied.is_none() {
            warn!(key = %row.key, value = %row.value, "Ignoring unparseable store setting");
            continue;
        }
        match candidate.validate() {
            Ok(()) => settings = candidate,
            Err(e) => {
                warn!(key = %row.key, value = %row.value, "Ignoring out-of-range store setting: {}", e);
            }
        }
    }
    settings
}

fn parse_into<T: FromStr>(value: &str, slot: &mut T) -> Option<()> {
    *slot = value.parse().ok()?;
    Some(())
}

fn parse_amount(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .ok()
        .filter(|amount| !amount.is_sign_negative())
}
