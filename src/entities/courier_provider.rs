use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A configured delivery company account.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "courier_providers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub provider_type: ProviderType,
    pub is_active: bool,
    /// Credentials and options, shape depends on `provider_type`
    #[sea_orm(column_type = "Json")]
    #[serde(skip_serializing)]
    pub config: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderType {
    #[sea_orm(string_value = "pathao")]
    Pathao,
    #[sea_orm(string_value = "steadfast")]
    Steadfast,
    #[sea_orm(string_value = "redx")]
    Redx,
    #[sea_orm(string_value = "paperfly")]
    Paperfly,
    #[sea_orm(string_value = "ecourier")]
    Ecourier,
    #[sea_orm(string_value = "carrybee")]
    Carrybee,
}
