use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::entities::{PayableRef, PaymentTag, TransactionStatus};

/// Events published by the payment subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TransactionPaid {
        transaction_id: i64,
        payable: PayableRef,
        user_id: i64,
        amount: Decimal,
        provider: PaymentTag,
        paid_at: DateTime<Utc>,
    },
    TransactionStatusChanged {
        transaction_id: i64,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    StatusConflictIgnored {
        transaction_id: i64,
        current: TransactionStatus,
        incoming: TransactionStatus,
    },
    ShopHidden {
        shop_id: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::TransactionPaid {
                transaction_id,
                payable,
                user_id,
                amount,
                provider,
                paid_at,
            } => {
                info!(
                    transaction_id,
                    %payable,
                    user_id,
                    %amount,
                    %provider,
                    %paid_at,
                    "transaction paid"
                );
            }
            Event::TransactionStatusChanged {
                transaction_id,
                from,
                to,
            } => {
                info!(transaction_id, %from, %to, "transaction status changed");
            }
            Event::StatusConflictIgnored {
                transaction_id,
                current,
                incoming,
            } => {
                warn!(
                    transaction_id,
                    %current,
                    %incoming,
                    "conflicting provider status ignored"
                );
            }
            Event::ShopHidden { shop_id } => {
                info!(shop_id, "shop hidden after reaching its subscription order limit");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_receiver() {
        let (sender, mut rx) = channel(4);
        sender.send(Event::ShopHidden { shop_id: 9 }).await.unwrap();
        match rx.recv().await {
            Some(Event::ShopHidden { shop_id }) => assert_eq!(shop_id, 9),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert!(sender.send(Event::ShopHidden { shop_id: 1 }).await.is_err());
    }
}
