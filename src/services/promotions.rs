use crate::{
    common::round_money,
    entities::{promo_application, promo_code, DiscountType, PromoApplication, PromoCode},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Why a promo code did not apply. Never surfaced to the client as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Inactive,
    NotStarted,
    Expired,
    UsageLimitReached,
    BelowMinimum,
}

#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a promo by its normalized code. Blank codes never hit the database.
    #[instrument(skip(self))]
    pub async fn find_by_code(
        &self,
        code: &str,
    ) -> Result<Option<promo_code::Model>, ServiceError> {
        let Some(code) = normalize_code(code) else {
            return Ok(None);
        };

        let promo = PromoCode::find()
            .filter(promo_code::Column::Code.eq(code))
            .one(&*self.db)
            .await?;
        Ok(promo)
    }

    /// Bumps the usage counter in a single UPDATE and records the audit row.
    #[instrument(skip(self))]
    pub async fn record_usage(
        &self,
        promo_id: Uuid,
        order_id: Uuid,
        user_id: Option<Uuid>,
        discount: Decimal,
    ) -> Result<(), ServiceError> {
        PromoCode::update_many()
            .col_expr(
                promo_code::Column::UsedCount,
                Expr::col(promo_code::Column::UsedCount).add(1),
            )
            .filter(promo_code::Column::Id.eq(promo_id))
            .exec(&*self.db)
            .await?;

        promo_application::ActiveModel {
            id: Set(Uuid::new_v4()),
            promo_code_id: Set(promo_id),
            order_id: Set(order_id),
            user_id: Set(user_id),
            discount_amount: Set(discount),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        Ok(())
    }

    pub async fn applications_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<promo_application::Model>, ServiceError> {
        Ok(PromoApplication::find()
            .filter(promo_application::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }
}

/// Trimmed, upper-cased code; `None` for blank input.
pub fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_uppercase())
}

pub fn check_eligibility(
    promo: &promo_code::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<(), Ineligible> {
    if !promo.is_active {
        return Err(Ineligible::Inactive);
    }
    if promo.starts_at.is_some_and(|starts| now < starts) {
        return Err(Ineligible::NotStarted);
    }
    if promo.expires_at.is_some_and(|expires| now >= expires) {
        return Err(Ineligible::Expired);
    }
    if promo
        .usage_limit
        .is_some_and(|limit| promo.used_count >= limit)
    {
        return Err(Ineligible::UsageLimitReached);
    }
    if promo.min_order_amount.is_some_and(|min| subtotal < min) {
        return Err(Ineligible::BelowMinimum);
    }
    Ok(())
}

/// Discount for `subtotal`, or zero when the promo is not eligible.
///
/// Capped at the promo's maximum and at the subtotal, rounded to 2 dp.
pub fn calculate_discount(
    promo: &promo_code::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Decimal {
    if let Err(reason) = check_eligibility(promo, subtotal, now) {
        debug!(code = %promo.code, ?reason, "Promo code not applied");
        return Decimal::ZERO;
    }

    let raw = match promo.discount_type {
        DiscountType::Percentage => subtotal * promo.discount_value / Decimal::ONE_HUNDRED,
        DiscountType::Fixed => promo.discount_value,
    };

    let capped = match promo.max_discount_amount {
        Some(max) => raw.min(max),
        None => raw,
    };

    round_money(capped.min(subtotal).max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn promo(discount_type: DiscountType, value: Decimal) -> promo_code::Model {
        promo_code::Model {
            id: Uuid::new_v4(),
            code: "EID10".into(),
            discount_type,
            discount_value: value,
            min_order_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            used_count: 0,
            starts_at: None,
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percentage_discount_is_rounded_to_two_places() {
        let p = promo(DiscountType::Percentage, dec!(12.5));
        assert_eq!(calculate_discount(&p, dec!(999.99), Utc::now()), dec!(125.00));
    }

    #[test]
    fn percentage_discount_respects_cap() {
        let mut p = promo(DiscountType::Percentage, dec!(20));
        p.max_discount_amount = Some(dec!(300));
        assert_eq!(calculate_discount(&p, dec!(5000), Utc::now()), dec!(300));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let p = promo(DiscountType::Fixed, dec!(500));
        assert_eq!(calculate_discount(&p, dec!(350), Utc::now()), dec!(350));
    }

    #[test]
    fn each_ineligibility_yields_zero() {
        let now = Utc::now();
        let base = promo(DiscountType::Fixed, dec!(100));

        let mut inactive = base.clone();
        inactive.is_active = false;
        let mut future = base.clone();
        future.starts_at = Some(now + Duration::days(1));
        let mut expired = base.clone();
        expired.expires_at = Some(now - Duration::minutes(1));
        let mut exhausted = base.clone();
        exhausted.usage_limit = Some(10);
        exhausted.used_count = 10;
        let mut minimum = base.clone();
        minimum.min_order_amount = Some(dec!(2000));

        for (promo, reason) in [
            (inactive, Ineligible::Inactive),
            (future, Ineligible::NotStarted),
            (expired, Ineligible::Expired),
            (exhausted, Ineligible::UsageLimitReached),
            (minimum, Ineligible::BelowMinimum),
        ] {
            assert_eq!(check_eligibility(&promo, dec!(1000), now), Err(reason));
            assert_eq!(calculate_discount(&promo, dec!(1000), now), Decimal::ZERO);
        }
    }

    #[test]
    fn codes_are_trimmed_and_upper_cased() {
        assert_eq!(normalize_code("  eid10 ").as_deref(), Some("EID10"));
        assert_eq!(normalize_code("   "), None);
    }

    proptest! {
        #[test]
        fn discount_stays_within_zero_and_subtotal(
            subtotal_cents in 0i64..10_000_000,
            value in 0u32..20_000,
            percentage in any::<bool>(),
        ) {
            let subtotal = Decimal::new(subtotal_cents, 2);
            let p = if percentage {
                promo(DiscountType::Percentage, Decimal::from(value % 101))
            } else {
                promo(DiscountType::Fixed, Decimal::from(value))
            };
            let discount = calculate_discount(&p, subtotal, Utc::now());
            prop_assert!(discount >= Decimal::ZERO);
            prop_assert!(discount <= subtotal);
        }
    }
}
