use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product as seen by checkout: price, stock and availability.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// List price
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub price: Decimal,
    /// Discounted price, honoured only when positive and below `price`
    #[sea_orm(column_type = "Decimal(Some((12, 2)))", nullable)]
    pub sale_price: Option<Decimal>,
    pub stock_quantity: i32,
    pub is_active: bool,
    /// Orders above stock are accepted as preorders instead of rejected
    pub allow_preorder: bool,
    /// Shipping weight per unit, used for courier declarations
    #[sea_orm(column_type = "Decimal(Some((8, 3)))", nullable)]
    pub weight_kg: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Price charged at checkout.
    pub fn effective_price(&self) -> Decimal {
        match self.sale_price {
            Some(sale) if sale > Decimal::ZERO && sale < self.price => sale,
            _ => self.price,
        }
    }
}
