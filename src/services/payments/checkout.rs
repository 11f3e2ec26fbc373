use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde_json::{json, Value};
use tracing::{error, info, instrument};
use validator::Validate;

use super::{
    active_provider, CheckoutIntent, CheckoutRequest, CheckoutSession, GatewayRegistry,
};
use crate::{
    config::AppConfig,
    entities::{
        booking, order, order::OrderStatus, payment, payment_process, PayableKind, PayableRef,
        PaymentTag,
    },
    errors::ServiceError,
    services::transactions::TransactionService,
};

/// Opens provider checkout sessions and records them as payment processes.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateways: GatewayRegistry,
    config: Arc<AppConfig>,
    transactions: TransactionService,
}

/// Amount owed for a checkout target.
struct Charge {
    amount: Decimal,
    currency: String,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, gateways: GatewayRegistry, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            gateways,
            config,
            transactions: TransactionService::new(),
        }
    }

    /// Starts a payment with provider `tag` for the target of `intent`.
    ///
    /// The provider is called first; the payment process is written only
    /// after it confirmed the session. A retried checkout replaces the
    /// caller's previous process for the same target.
    #[instrument(skip(self, intent), fields(provider = %tag))]
    pub async fn process_transaction(
        &self,
        user_id: i64,
        tag: PaymentTag,
        intent: CheckoutIntent,
    ) -> Result<payment_process::Model, ServiceError> {
        intent.validate()?;
        let target = intent.target()?;

        let (provider, credentials) = active_provider(self.db.as_ref(), tag)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("Payment method {} is not available", tag))
            })?;
        let gateway = self.gateways.get(tag)?;

        let charge = self.resolve_charge(user_id, target, &intent).await?;
        let request = CheckoutRequest {
            payable: target,
            user_id,
            amount: charge.amount,
            currency: charge.currency,
            description: format!("Payment for {} {}", target.kind, target.id),
            payer: intent.payer(),
            callback_url: self.config.webhook_url(tag.as_ref()),
            success_url: self.config.return_url("success"),
            cancel_url: self.config.return_url("cancel"),
        };

        let session = gateway.create_checkout(&credentials, &request).await?;
        info!(payable = %target, process_id = %session.process_id, "provider session opened");

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        let stored = match self
            .store_process(&txn, &provider, &request, &intent, session)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Failed to roll back checkout: {}", rollback_err);
                }
                return Err(err);
            }
        };
        txn.commit().await.map_err(|e| {
            error!("Failed to commit checkout: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        Ok(stored)
    }

    async fn resolve_charge(
        &self,
        user_id: i64,
        target: PayableRef,
        intent: &CheckoutIntent,
    ) -> Result<Charge, ServiceError> {
        let db = self.db.as_ref();
        let (amount, currency) = match target.kind {
            PayableKind::Order => {
                let order = order::Entity::find_by_id(target.id)
                    .filter(order::Column::UserId.eq(user_id))
                    .one(db)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", target.id)))?;
                ensure_payable(target, order.status, order.paid_at.is_some())?;
                (order.total_price, order.currency)
            }
            PayableKind::Booking => {
                let booking = booking::Entity::find_by_id(target.id)
                    .filter(booking::Column::UserId.eq(user_id))
                    .one(db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Booking {} not found", target.id))
                    })?;
                ensure_payable(target, booking.status, booking.paid_at.is_some())?;
                (booking.total_price, booking.currency)
            }
            _ => {
                let amount = intent.total_price.ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "total_price is required to pay for a {}",
                        target.kind
                    ))
                })?;
                let currency = intent
                    .currency
                    .clone()
                    .unwrap_or_else(|| self.config.default_currency.clone());
                (amount, currency)
            }
        };

        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "{} has nothing to pay",
                target
            )));
        }
        Ok(Charge {
            amount,
            currency: currency.to_uppercase(),
        })
    }

    async fn store_process(
        &self,
        txn: &DatabaseTransaction,
        provider: &payment::Model,
        request: &CheckoutRequest,
        intent: &CheckoutIntent,
        session: CheckoutSession,
    ) -> Result<payment_process::Model, ServiceError> {
        let target = request.payable;

        payment_process::Entity::delete_many()
            .filter(payment_process::Column::UserId.eq(request.user_id))
            .filter(payment_process::Column::ModelType.eq(target.kind))
            .filter(payment_process::Column::ModelId.eq(target.id))
            .exec(txn)
            .await?;

        let mut data = match session.data {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("session".into(), other);
                map
            }
        };
        data.insert("price".into(), json!(request.amount.to_string()));
        data.insert("currency".into(), json!(request.currency));
        data.insert("provider".into(), json!(provider.tag));
        if let Some(kind) = &intent.kind {
            data.insert("type".into(), json!(kind));
        }

        let now = Utc::now();
        let process = payment_process::ActiveModel {
            id: Set(session.process_id.clone()),
            user_id: Set(request.user_id),
            model_type: Set(target.kind),
            model_id: Set(target.id),
            data: Set(Value::Object(data)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        if target.kind.has_stored_total() {
            let trx = self
                .transactions
                .upsert_for_payable(txn, target, request.user_id, provider.id, request.amount)
                .await?;
            self.transactions
                .attach_token(txn, trx.id, provider.id, &session.process_id)
                .await?;
        }

        Ok(process)
    }
}

fn ensure_payable(target: PayableRef, status: OrderStatus, paid: bool) -> Result<(), ServiceError> {
    if paid {
        return Err(ServiceError::InvalidOperation(format!("{} is already paid", target)));
    }
    if status == OrderStatus::Canceled {
        return Err(ServiceError::InvalidOperation(format!("{} is canceled", target)));
    }
    Ok(())
}
