use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub use super::order::OrderStatus as BookingStatus;

/// A service booking. Priced like an order, without delivery.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub shop_id: i64,
    pub status: BookingStatus,
    pub currency: String,
    pub total_price: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub commission_fee: Decimal,
    pub delivery_fee: Decimal,
    pub coupon_price: Decimal,
    pub service_fee: Decimal,
    pub tips: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::booking_extra_time::Entity")]
    ExtraTimes,
    #[sea_orm(
        belongs_to = "super::shop::Entity",
        from = "Column::ShopId",
        to = "super::shop::Column::Id"
    )]
    Shop,
}

impl Related<super::booking_extra_time::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExtraTimes.def()
    }
}

impl Related<super::shop::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shop.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
