//! Reconciliation of provider webhooks against local transactions.
//!
//! A webhook is authenticated by its provider gateway, reduced to a
//! correlation token and a canonical status, and applied to the matching
//! transaction inside one database transaction. Effects of the first
//! transition into `paid` are written in that same database transaction;
//! the notifier only runs after commit, so a retried delivery can never
//! notify twice.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{
    entities::{
        booking, order, payment, payment_process, transaction, PayableKind, PayableRef,
        PaymentTag, TransactionStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        notifications::{Notifier, PaidNotice},
        payments::{
            active_provider, map_provider_status, pointer_str, GatewayRegistry,
            WebhookNotification, WebhookRequest,
        },
        stats::StatsRecorder,
        transactions::{StatusUpdate, TransactionService},
    },
};

/// What a webhook delivery did to local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationResult {
    Applied {
        transaction_id: i64,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    /// The transaction already had this status; nothing was re-triggered.
    Duplicate {
        transaction_id: i64,
        status: TransactionStatus,
    },
    /// The stored status was kept and the delivery acknowledged.
    ConflictIgnored {
        transaction_id: i64,
        current: TransactionStatus,
        incoming: TransactionStatus,
    },
    /// No transaction or payment process carries the token.
    UnknownToken,
    /// Authentic event without a payment status.
    Ignored,
}

/// Post-commit work produced by a reconciliation.
struct Reconciled {
    result: ReconciliationResult,
    paid: Option<PaidNotice>,
}

#[derive(Clone)]
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
    transactions: TransactionService,
    stats: StatsRecorder,
    events: Option<EventSender>,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            gateways,
            notifier,
            transactions: TransactionService::new(),
            stats: StatsRecorder::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Authenticates and applies one webhook delivery.
    ///
    /// Replays and conflicting statuses are successful outcomes. Errors are
    /// returned only when the delivery is rejected, malformed or could not
    /// be persisted; in the last case the provider's retry is safe.
    #[instrument(skip(self, request), fields(provider = %tag))]
    pub async fn handle_webhook(
        &self,
        tag: PaymentTag,
        request: WebhookRequest,
    ) -> Result<ReconciliationResult, ServiceError> {
        let gateway = self.gateways.get(tag)?;
        let (provider, credentials) = active_provider(self.db.as_ref(), tag)
            .await?
            .ok_or_else(|| ServiceError::WebhookRejected(format!("{} is not enabled", tag)))?;

        let notification = match gateway.parse_webhook(&credentials, &request).await {
            Ok(Some(notification)) => notification,
            Ok(None) => return Ok(ReconciliationResult::Ignored),
            Err(err) => {
                if matches!(err, ServiceError::WebhookRejected(_)) {
                    warn!(reason = %err, "webhook rejected");
                }
                return Err(err);
            }
        };
        let incoming = map_provider_status(tag, &notification.status);
        info!(token = %notification.token, raw_status = %notification.status, %incoming, "webhook authenticated");

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        let reconciled = match self.reconcile_in(&txn, &provider, &notification, incoming).await {
            Ok(reconciled) => reconciled,
            Err(err) => {
                error!(error = %err, "webhook reconciliation failed");
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Failed to roll back reconciliation: {}", rollback_err);
                }
                return Err(err);
            }
        };
        txn.commit().await.map_err(|e| {
            error!("Failed to commit reconciliation: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        if let Some(notice) = &reconciled.paid {
            if let Err(err) = self.notifier.transaction_paid(notice).await {
                warn!(transaction_id = notice.transaction_id, error = %err, "paid notification failed");
            }
        }
        self.publish(&reconciled.result).await;

        Ok(reconciled.result)
    }

    async fn reconcile_in(
        &self,
        txn: &DatabaseTransaction,
        provider: &payment::Model,
        notification: &WebhookNotification,
        incoming: TransactionStatus,
    ) -> Result<Reconciled, ServiceError> {
        let token = notification.token.as_str();
        let Some(current) = self.locate(txn, provider, token).await? else {
            warn!(%token, "no transaction or payment process for webhook token");
            return Ok(Reconciled {
                result: ReconciliationResult::UnknownToken,
                paid: None,
            });
        };

        let note = format!("{} reported {}", provider.tag, notification.status);
        let update = self
            .transactions
            .apply_status(txn, current, incoming, Some(note))
            .await?;

        let mut paid = None;
        if update.is_first_payment() {
            let trx = update.transaction();
            let paid_at = trx.perform_time.unwrap_or_else(Utc::now);
            mark_paid(txn, trx.payable(), paid_at).await?;
            self.stats.record_paid(txn, trx.user_id, trx.price).await?;
            paid = Some(PaidNotice {
                transaction_id: trx.id,
                payable: trx.payable(),
                user_id: trx.user_id,
                amount: trx.price,
                provider: provider.tag,
                paid_at,
            });
        }

        let settled = update.transaction().status;
        if settled == TransactionStatus::Paid || settled.is_terminal() {
            payment_process::Entity::delete_by_id(token.to_string())
                .exec(txn)
                .await?;
        }

        let result = match update {
            StatusUpdate::Applied { from, transaction } => ReconciliationResult::Applied {
                transaction_id: transaction.id,
                from,
                to: transaction.status,
            },
            StatusUpdate::Duplicate(transaction) => ReconciliationResult::Duplicate {
                transaction_id: transaction.id,
                status: transaction.status,
            },
            StatusUpdate::Conflict {
                incoming,
                transaction,
            } => ReconciliationResult::ConflictIgnored {
                transaction_id: transaction.id,
                current: transaction.status,
                incoming,
            },
        };
        Ok(Reconciled { result, paid })
    }

    /// Finds the transaction a token belongs to. When only the payment
    /// process is known, its payable gets a transaction carrying the token.
    ///
    /// Deliveries racing on the same process serialize on its row lock, and
    /// whoever waited re-reads the token and finds the winner's transaction.
    async fn locate(
        &self,
        txn: &DatabaseTransaction,
        provider: &payment::Model,
        token: &str,
    ) -> Result<Option<transaction::Model>, ServiceError> {
        if let Some(found) = self.transactions.find_by_token(txn, provider.id, token).await? {
            return Ok(Some(found));
        }

        let process = payment_process::Entity::find_by_id(token.to_string())
            .lock_exclusive()
            .one(txn)
            .await?;
        if let Some(found) = self.transactions.find_by_token(txn, provider.id, token).await? {
            return Ok(Some(found));
        }
        let Some(process) = process else {
            return Ok(None);
        };

        let savepoint = txn.begin().await?;
        match self.recover(&savepoint, provider, &process).await {
            Ok(()) => savepoint.commit().await?,
            Err(err) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    error!("Failed to roll back process recovery: {}", rollback_err);
                }
                if !err.is_unique_violation() {
                    return Err(err);
                }
                warn!(%token, "token recorded by a concurrent delivery; re-reading");
            }
        }

        self.transactions.find_by_token(txn, provider.id, token).await
    }

    async fn recover<C: ConnectionTrait>(
        &self,
        conn: &C,
        provider: &payment::Model,
        process: &payment_process::Model,
    ) -> Result<(), ServiceError> {
        let price = process_price(process)?;
        let payable = process.payable();
        let trx = self
            .transactions
            .upsert_for_payable(conn, payable, process.user_id, provider.id, price)
            .await?;
        self.transactions
            .attach_token(conn, trx.id, provider.id, &process.id)
            .await?;
        info!(%payable, transaction_id = trx.id, "transaction recovered from payment process");
        Ok(())
    }

    async fn publish(&self, result: &ReconciliationResult) {
        let Some(events) = &self.events else {
            return;
        };
        let event = match *result {
            ReconciliationResult::Applied {
                transaction_id,
                from,
                to,
            } => Event::TransactionStatusChanged {
                transaction_id,
                from,
                to,
            },
            ReconciliationResult::ConflictIgnored {
                transaction_id,
                current,
                incoming,
            } => Event::StatusConflictIgnored {
                transaction_id,
                current,
                incoming,
            },
            _ => return,
        };
        if let Err(e) = events.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Price recorded in a payment process at checkout time.
fn process_price(process: &payment_process::Model) -> Result<Decimal, ServiceError> {
    pointer_str(&process.data, "/price")
        .and_then(|raw| Decimal::from_str(&raw).ok())
        .ok_or_else(|| {
            ServiceError::InternalError(format!("payment process {} has no price", process.id))
        })
}

/// Stamps `paid_at` on an order or booking. Other payables are settled by
/// their own services from the paid notice.
async fn mark_paid<C: ConnectionTrait>(
    conn: &C,
    payable: PayableRef,
    paid_at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    match payable.kind {
        PayableKind::Order => {
            order::Entity::update_many()
                .set(order::ActiveModel {
                    paid_at: Set(Some(paid_at)),
                    updated_at: Set(paid_at),
                    ..Default::default()
                })
                .filter(order::Column::Id.eq(payable.id))
                .filter(order::Column::PaidAt.is_null())
                .exec(conn)
                .await?;
        }
        PayableKind::Booking => {
            booking::Entity::update_many()
                .set(booking::ActiveModel {
                    paid_at: Set(Some(paid_at)),
                    updated_at: Set(paid_at),
                    ..Default::default()
                })
                .filter(booking::Column::Id.eq(payable.id))
                .filter(booking::Column::PaidAt.is_null())
                .exec(conn)
                .await?;
        }
        _ => {}
    }
    Ok(())
}
