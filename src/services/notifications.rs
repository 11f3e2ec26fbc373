use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    entities::{PayableRef, PaymentTag},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Details of a transaction's first successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidNotice {
    pub transaction_id: i64,
    pub payable: PayableRef,
    pub user_id: i64,
    pub amount: Decimal,
    pub provider: PaymentTag,
    pub paid_at: DateTime<Utc>,
}

/// Receives payment notices after the reconciling transaction has committed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn transaction_paid(&self, notice: &PaidNotice) -> Result<(), ServiceError>;
}

/// Publishes notices on the in-process event channel.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    events: EventSender,
}

impl EventNotifier {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Notifier for EventNotifier {
    async fn transaction_paid(&self, notice: &PaidNotice) -> Result<(), ServiceError> {
        self.events
            .send(Event::TransactionPaid {
                transaction_id: notice.transaction_id,
                payable: notice.payable,
                user_id: notice.user_id,
                amount: notice.amount,
                provider: notice.provider,
                paid_at: notice.paid_at,
            })
            .await
            .map_err(ServiceError::InternalError)
    }
}
