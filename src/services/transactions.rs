use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{info, instrument, warn};

use crate::{
    entities::{
        transaction::{self, Column, Entity as Transaction, Transition},
        PayableRef, TransactionStatus,
    },
    errors::ServiceError,
};

/// Rounds of compare-and-swap before a status update gives up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Result of applying a provider-reported status to a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied {
        from: TransactionStatus,
        transaction: transaction::Model,
    },
    /// The transaction already had the reported status.
    Duplicate(transaction::Model),
    /// The stored status was kept.
    Conflict {
        incoming: TransactionStatus,
        transaction: transaction::Model,
    },
}

impl StatusUpdate {
    pub fn transaction(&self) -> &transaction::Model {
        match self {
            StatusUpdate::Applied { transaction, .. }
            | StatusUpdate::Duplicate(transaction)
            | StatusUpdate::Conflict { transaction, .. } => transaction,
        }
    }

    /// True only for the update that moved the transaction into `paid`.
    pub fn is_first_payment(&self) -> bool {
        matches!(
            self,
            StatusUpdate::Applied { from, transaction }
                if *from != TransactionStatus::Paid
                    && transaction.status == TransactionStatus::Paid
        )
    }
}

/// Transaction persistence on a caller-supplied connection or database transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionService;

impl TransactionService {
    pub fn new() -> Self {
        Self
    }

    /// Creates the in-progress transaction of a payable, or re-prices the
    /// one that already exists.
    #[instrument(skip(self, conn), fields(payable = %payable))]
    pub async fn upsert_for_payable<C: ConnectionTrait>(
        &self,
        conn: &C,
        payable: PayableRef,
        user_id: i64,
        payment_sys_id: i64,
        price: Decimal,
    ) -> Result<transaction::Model, ServiceError> {
        let now = Utc::now();
        let existing = Transaction::find()
            .filter(Column::PayableType.eq(payable.kind))
            .filter(Column::PayableId.eq(payable.id))
            .filter(Column::Status.eq(TransactionStatus::Progress))
            .order_by_desc(Column::Id)
            .one(conn)
            .await?;

        let model = match existing {
            Some(existing) => {
                let mut active: transaction::ActiveModel = existing.into();
                active.price = Set(price);
                active.payment_sys_id = Set(payment_sys_id);
                active.user_id = Set(user_id);
                active.updated_at = Set(now);
                active.update(conn).await?
            }
            None => {
                transaction::ActiveModel {
                    payable_type: Set(payable.kind),
                    payable_id: Set(payable.id),
                    user_id: Set(user_id),
                    payment_sys_id: Set(payment_sys_id),
                    payment_trx_id: Set(None),
                    price: Set(price),
                    status: Set(TransactionStatus::Progress),
                    note: Set(None),
                    perform_time: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(conn)
                .await?
            }
        };

        info!(transaction_id = model.id, %price, "transaction recorded for payable");
        Ok(model)
    }

    /// Stores the provider token on a transaction. A token is unique per
    /// provider, so attaching one that another transaction holds fails with a
    /// unique violation.
    pub async fn attach_token<C: ConnectionTrait>(
        &self,
        conn: &C,
        transaction_id: i64,
        payment_sys_id: i64,
        token: &str,
    ) -> Result<(), ServiceError> {
        Transaction::update_many()
            .set(transaction::ActiveModel {
                payment_sys_id: Set(payment_sys_id),
                payment_trx_id: Set(Some(token.to_string())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Column::Id.eq(transaction_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    pub async fn find_by_token<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_sys_id: i64,
        token: &str,
    ) -> Result<Option<transaction::Model>, ServiceError> {
        Ok(Transaction::find()
            .filter(Column::PaymentSysId.eq(payment_sys_id))
            .filter(Column::PaymentTrxId.eq(token))
            .order_by_desc(Column::Id)
            .one(conn)
            .await?)
    }

    /// Moves a transaction to `incoming` following the transition table.
    ///
    /// The write only lands while the row still holds the status it was read
    /// with; a lost race reloads the row and decides again.
    #[instrument(skip(self, conn, current), fields(transaction_id = current.id, %incoming))]
    pub async fn apply_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        current: transaction::Model,
        incoming: TransactionStatus,
        note: Option<String>,
    ) -> Result<StatusUpdate, ServiceError> {
        let id = current.id;
        let mut current = current;

        for _ in 0..MAX_CAS_ATTEMPTS {
            match current.status.transition_to(incoming) {
                Transition::Noop => return Ok(StatusUpdate::Duplicate(current)),
                Transition::Conflict => {
                    warn!(
                        current = %current.status,
                        "provider status conflicts with stored status; keeping stored status"
                    );
                    return Ok(StatusUpdate::Conflict {
                        incoming,
                        transaction: current,
                    });
                }
                Transition::Apply => {}
            }

            let now = Utc::now();
            let mut changes = transaction::ActiveModel {
                status: Set(incoming),
                perform_time: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            };
            if let Some(note) = note.clone() {
                changes.note = Set(Some(note));
            }

            let result = Transaction::update_many()
                .set(changes)
                .filter(Column::Id.eq(id))
                .filter(Column::Status.eq(current.status))
                .exec(conn)
                .await?;

            if result.rows_affected == 1 {
                let from = current.status;
                let transaction = Transaction::find_by_id(id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))?;
                info!(%from, to = %incoming, "transaction status updated");
                return Ok(StatusUpdate::Applied { from, transaction });
            }

            current = Transaction::find_by_id(id)
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))?;
        }

        Err(ServiceError::ConcurrentModification(id))
    }
}
