use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Every kind of record a transaction or payment process can be attached to.
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
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayableKind {
    #[sea_orm(string_value = "order")]
    Order,
    #[sea_orm(string_value = "booking")]
    Booking,
    #[sea_orm(string_value = "cart")]
    Cart,
    #[sea_orm(string_value = "gift_cart")]
    GiftCart,
    #[sea_orm(string_value = "member_ship")]
    MemberShip,
    #[sea_orm(string_value = "parcel")]
    Parcel,
    #[sea_orm(string_value = "subscription")]
    Subscription,
    #[sea_orm(string_value = "ads_package")]
    AdsPackage,
    #[sea_orm(string_value = "wallet")]
    Wallet,
}

impl PayableKind {
    /// Kinds whose chargeable amount is computed and stored locally.
    pub fn has_stored_total(self) -> bool {
        matches!(self, PayableKind::Order | PayableKind::Booking)
    }
}

/// Reference to a single payable record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PayableRef {
    pub kind: PayableKind,
    pub id: i64,
}

impl PayableRef {
    pub fn new(kind: PayableKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn order(id: i64) -> Self {
        Self::new(PayableKind::Order, id)
    }

    pub fn booking(id: i64) -> Self {
        Self::new(PayableKind::Booking, id)
    }
}

impl fmt::Display for PayableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}
