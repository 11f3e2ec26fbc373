use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Supported payment providers. The kebab-case name is both the stored tag
/// and the path segment of the checkout and webhook routes.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PaymentTag {
    #[sea_orm(string_value = "stripe")]
    Stripe,
    #[sea_orm(string_value = "pay-fast")]
    PayFast,
    #[sea_orm(string_value = "mtn")]
    Mtn,
    #[sea_orm(string_value = "moya-sar")]
    MoyaSar,
    #[sea_orm(string_value = "paypal")]
    Paypal,
    #[sea_orm(string_value = "mercado-pago")]
    MercadoPago,
}

/// Catalog entry for one provider.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub tag: PaymentTag,
    pub active: bool,
    pub sandbox: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::payment_payload::Entity")]
    Payload,
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::payment_payload::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payload.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
