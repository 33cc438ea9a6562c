use crate::{
    entities::{product, Product},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub const MIN_LINE_QUANTITY: i32 = 1;
pub const MAX_LINE_QUANTITY: i32 = 100;

/// Product line as requested by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Price the client displayed; ignored
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// A cart line priced from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub is_preorder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub is_preorder: bool,
    /// Sum of known unit weights times quantity, in kg
    pub total_weight_kg: Decimal,
}

/// Current price, stock and availability of catalog products.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(count = product_ids.len()))]
    pub async fn fetch_products(
        &self,
        product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let products = Product::find()
            .filter(product::Column::Id.is_in(product_ids.iter().copied()))
            .all(&*self.db)
            .await?;

        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }
}

/// Merges duplicate product lines in first-seen order and clamps quantities to [1, 100].
pub fn merge_lines(lines: &[CartLine]) -> Vec<(Uuid, i32)> {
    let mut merged: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());
    for line in lines {
        let quantity = clamp_quantity(line.quantity);
        match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, existing)) => *existing = clamp_quantity(existing.saturating_add(quantity)),
            None => merged.push((line.product_id, quantity)),
        }
    }
    merged
}

pub fn clamp_quantity(quantity: i32) -> i32 {
    quantity.clamp(MIN_LINE_QUANTITY, MAX_LINE_QUANTITY)
}

/// Prices merged lines against the catalog.
///
/// Fails on the first line whose product is missing, inactive, or short of
/// stock without allowing preorders.
pub fn price_lines(
    lines: &[(Uuid, i32)],
    products: &HashMap<Uuid, product::Model>,
) -> Result<PricedCart, ServiceError> {
    let mut priced = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;
    let mut total_weight_kg = Decimal::ZERO;

    for &(product_id, quantity) in lines {
        let product = products
            .get(&product_id)
            .ok_or(ServiceError::ProductNotFound { product_id })?;

        if !product.is_active {
            return Err(ServiceError::ProductUnavailable {
                product_id,
                name: product.name.clone(),
            });
        }

        let available = product.stock_quantity.max(0);
        let is_preorder = quantity > available;
        if is_preorder && !product.allow_preorder {
            return Err(ServiceError::OutOfStock {
                product_id,
                name: product.name.clone(),
                requested: quantity,
                available,
            });
        }

        let unit_price = product.effective_price();
        let line_total = unit_price * Decimal::from(quantity);
        subtotal += line_total;
        if let Some(weight) = product.weight_kg {
            total_weight_kg += weight * Decimal::from(quantity);
        }

        priced.push(PricedLine {
            product_id,
            product_name: product.name.clone(),
            unit_price,
            quantity,
            line_total,
            is_preorder,
        });
    }

    Ok(PricedCart {
        is_preorder: priced.iter().any(|l| l.is_preorder),
        lines: priced,
        subtotal,
        total_weight_kg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product(name: &str, price: Decimal, stock: i32) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: name.into(),
            price,
            sale_price: None,
            stock_quantity: stock,
            is_active: true,
            allow_preorder: false,
            weight_kg: Some(dec!(0.5)),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn catalog(products: &[product::Model]) -> HashMap<Uuid, product::Model> {
        products.iter().map(|p| (p.id, p.clone())).collect()
    }

    fn line(product_id: Uuid, quantity: i32) -> CartLine {
        CartLine {
            product_id,
            quantity,
            price: Some(dec!(1)),
        }
    }

    #[test]
    fn duplicate_lines_are_merged_and_clamped() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let merged = merge_lines(&[line(a, 2), line(b, 0), line(a, 3), line(b, 500)]);
        assert_eq!(merged, vec![(a, 5), (b, 100)]);
    }

    #[test]
    fn subtotal_uses_server_prices() {
        let mut shirt = product("Shirt", dec!(900), 10);
        shirt.sale_price = Some(dec!(750));
        let cap = product("Cap", dec!(250), 10);
        let products = catalog(&[shirt.clone(), cap.clone()]);

        let cart = price_lines(&[(shirt.id, 2), (cap.id, 1)], &products).unwrap();
        assert_eq!(cart.subtotal, dec!(1750));
        assert_eq!(cart.lines[0].unit_price, dec!(750));
        assert_eq!(cart.total_weight_kg, dec!(1.5));
        assert!(!cart.is_preorder);
    }

    #[test]
    fn missing_product_is_reported_by_id() {
        let id = Uuid::new_v4();
        let err = price_lines(&[(id, 1)], &HashMap::new()).unwrap_err();
        assert_matches!(err, ServiceError::ProductNotFound { product_id } if product_id == id);
    }

    #[test]
    fn inactive_product_is_unavailable() {
        let mut p = product("Old stock", dec!(100), 5);
        p.is_active = false;
        let err = price_lines(&[(p.id, 1)], &catalog(&[p.clone()])).unwrap_err();
        assert_matches!(err, ServiceError::ProductUnavailable { name, .. } if name == "Old stock");
    }

    #[test]
    fn over_stock_without_preorder_names_available_quantity() {
        let p = product("Saree", dec!(3200), 2);
        let err = price_lines(&[(p.id, 3)], &catalog(&[p.clone()])).unwrap_err();
        assert_matches!(
            err,
            ServiceError::OutOfStock { requested: 3, available: 2, .. }
        );
    }

    #[test]
    fn over_stock_with_preorder_marks_the_line() {
        let mut p = product("Lehenga", dec!(5400), 0);
        p.allow_preorder = true;
        let cart = price_lines(&[(p.id, 2)], &catalog(&[p.clone()])).unwrap();
        assert!(cart.is_preorder);
        assert!(cart.lines[0].is_preorder);
        assert_eq!(cart.subtotal, dec!(10800));
    }
}
