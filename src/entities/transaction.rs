use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::payable::{PayableKind, PayableRef};

/// Canonical, provider-agnostic transaction status.
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
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    #[sea_orm(string_value = "progress")]
    Progress,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "canceled")]
    Canceled,
    #[sea_orm(string_value = "refund")]
    Refund,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "split")]
    Split,
}

/// Outcome of moving a transaction from its current status to an incoming one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Same status reported again.
    Noop,
    Apply,
    /// The stored status wins over the incoming one.
    Conflict,
}

impl TransactionStatus {
    /// No further status change is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Canceled | TransactionStatus::Refund | TransactionStatus::Rejected
        )
    }

    /// `progress` (and `split`) may move anywhere, `paid` only to `refund`.
    pub fn transition_to(self, incoming: TransactionStatus) -> Transition {
        use TransactionStatus::*;

        if self == incoming {
            return Transition::Noop;
        }
        match self {
            Progress | Split => Transition::Apply,
            Paid if incoming == Refund => Transition::Apply,
            _ => Transition::Conflict,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub payable_type: PayableKind,
    pub payable_id: i64,
    pub user_id: i64,
    pub payment_sys_id: i64,
    /// Provider correlation token.
    pub payment_trx_id: Option<String>,
    pub price: Decimal,
    pub status: TransactionStatus,
    pub note: Option<String>,
    pub perform_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn payable(&self) -> PayableRef {
        PayableRef::new(self.payable_type, self.payable_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentSysId",
        to = "super::payment::Column::Id"
    )]
    Payment,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::TransactionStatus::*;
    use super::*;

    #[test]
    fn progress_moves_anywhere() {
        for next in [Paid, Canceled, Refund, Rejected] {
            assert_eq!(Progress.transition_to(next), Transition::Apply);
        }
    }

    #[test]
    fn paid_is_never_downgraded() {
        assert_eq!(Paid.transition_to(Canceled), Transition::Conflict);
        assert_eq!(Paid.transition_to(Progress), Transition::Conflict);
        assert_eq!(Paid.transition_to(Paid), Transition::Noop);
        assert_eq!(Paid.transition_to(Refund), Transition::Apply);
    }

    #[test]
    fn terminal_states_are_final() {
        for current in [Canceled, Refund, Rejected] {
            assert!(current.is_terminal());
            assert_eq!(current.transition_to(Paid), Transition::Conflict);
            assert_eq!(current.transition_to(current), Transition::Noop);
        }
        assert!(!Paid.is_terminal());
    }
}
