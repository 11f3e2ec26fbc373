use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A tenant shop with the pricing terms it sells under.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shops")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    /// Tax percent applied to the line-item total.
    pub tax: Decimal,
    /// Platform commission percent.
    pub percentage: Decimal,
    /// Billed by flat subscription instead of per-order commission.
    pub by_subscription: bool,
    pub visibility: bool,
    pub delivery_price: Decimal,
    pub price_per_km: Decimal,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::shop_subscription::Entity")]
    Subscriptions,
}

impl Related<super::shop_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
