//! Payment providers behind one gateway contract.
//!
//! Each provider turns a [`CheckoutRequest`] into a provider session and
//! turns an inbound webhook into a [`WebhookNotification`] carrying the
//! correlation token and the provider's raw status word.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    entities::{payment, payment_payload, PayableRef, PaymentTag},
    errors::ServiceError,
};

pub mod checkout;
pub mod intent;
pub mod mercado_pago;
pub mod moyasar;
pub mod mtn;
pub mod payfast;
pub mod paypal;
pub mod signature;
pub mod status;
pub mod stripe;

pub use checkout::CheckoutService;
pub use intent::CheckoutIntent;
pub use status::map_provider_status;

/// Secrets and settings of one provider, read from its payment payload.
#[derive(Clone, Debug, Default)]
pub struct ProviderCredentials {
    payload: Value,
    pub sandbox: bool,
}

impl ProviderCredentials {
    pub fn new(payload: Value, sandbox: bool) -> Self {
        Self { payload, sandbox }
    }

    /// A non-empty string setting.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// A setting a checkout cannot proceed without.
    pub fn require(&self, tag: PaymentTag, key: &str) -> Result<&str, ServiceError> {
        self.get(key).ok_or_else(|| {
            ServiceError::InternalError(format!("{} is missing the `{}` setting", tag, key))
        })
    }

    /// A secret a webhook is authenticated with. Missing means reject.
    pub fn webhook_secret(&self, tag: PaymentTag, key: &str) -> Result<&str, ServiceError> {
        self.get(key).ok_or_else(|| {
            ServiceError::WebhookRejected(format!("{} has no `{}` configured", tag, key))
        })
    }

    /// API base URL: the `base_url` setting if present, otherwise the live or
    /// sandbox default.
    pub fn base_url(&self, live: &str, sandbox: &str) -> String {
        let base = match self.get("base_url") {
            Some(configured) => configured,
            None if self.sandbox => sandbox,
            None => live,
        };
        base.trim_end_matches('/').to_string()
    }
}

/// Who pays, as given in the checkout intent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Provider-neutral description of a payment to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub payable: PayableRef,
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub payer: Payer,
    /// Where the provider posts its webhook.
    pub callback_url: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider session: its key becomes the payment process id.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckoutSession {
    pub process_id: String,
    pub data: Value,
}

/// Raw inbound webhook as received over HTTP.
#[derive(Clone, Debug, Default)]
pub struct WebhookRequest {
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn json(&self) -> Result<Value, ServiceError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ServiceError::ValidationError(format!("webhook body is not JSON: {}", e)))
    }
}

/// An authenticated webhook reduced to what reconciliation needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookNotification {
    pub token: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn tag(&self) -> PaymentTag;

    /// Opens a provider session. Nothing is persisted here.
    async fn create_checkout(
        &self,
        credentials: &ProviderCredentials,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    /// Authenticates and reads a webhook. `Ok(None)` means the event is
    /// genuine but carries no payment status.
    async fn parse_webhook(
        &self,
        credentials: &ProviderCredentials,
        request: &WebhookRequest,
    ) -> Result<Option<WebhookNotification>, ServiceError>;
}

/// Gateways by provider tag.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentTag, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All six providers sharing one HTTP client.
    pub fn standard(http: reqwest::Client, webhook_tolerance: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(stripe::StripeGateway::new(
            http.clone(),
            webhook_tolerance,
        )));
        registry.register(Arc::new(payfast::PayFastGateway::new()));
        registry.register(Arc::new(mtn::MtnGateway::new(http.clone())));
        registry.register(Arc::new(moyasar::MoyasarGateway::new(http.clone())));
        registry.register(Arc::new(paypal::PaypalGateway::new(http.clone())));
        registry.register(Arc::new(mercado_pago::MercadoPagoGateway::new(http)));
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.tag(), gateway);
    }

    pub fn get(&self, tag: PaymentTag) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways
            .get(&tag)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Payment provider {} not found", tag)))
    }
}

/// The enabled catalog entry of a provider together with its credentials.
pub(crate) async fn active_provider<C: ConnectionTrait>(
    conn: &C,
    tag: PaymentTag,
) -> Result<Option<(payment::Model, ProviderCredentials)>, ServiceError> {
    let Some(provider) = payment::Entity::find()
        .filter(payment::Column::Tag.eq(tag))
        .filter(payment::Column::Active.eq(true))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    let payload = payment_payload::Entity::find_by_id(provider.id)
        .one(conn)
        .await?
        .map(|row| row.payload)
        .unwrap_or_default();
    let credentials = ProviderCredentials::new(payload, provider.sandbox);
    Ok(Some((provider, credentials)))
}

/// Builds the shared HTTP client for provider calls.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))
}

/// Reads a provider JSON response. Error bodies are logged and never
/// returned to callers.
pub(crate) async fn read_json(
    tag: PaymentTag,
    response: reqwest::Response,
) -> Result<Value, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(provider = %tag, %status, body = %truncate(&body, 512), "provider call failed");
        return Err(ServiceError::ExternalServiceError(format!(
            "{} responded with {}",
            tag, status
        )));
    }
    Ok(response.json::<Value>().await?)
}

/// Amount in the currency's minor unit (cents, halalas).
pub(crate) fn minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| {
            minor
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is out of range", amount)))
}

/// Reads a string at a JSON pointer, accepting numbers as well.
pub(crate) fn pointer_str(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn base_url_prefers_configured_override() {
        let creds = ProviderCredentials::new(json!({"base_url": "http://127.0.0.1:9000/"}), true);
        assert_eq!(
            creds.base_url("https://live", "https://sandbox"),
            "http://127.0.0.1:9000"
        );

        let sandbox = ProviderCredentials::new(json!({}), true);
        assert_eq!(sandbox.base_url("https://live", "https://sandbox"), "https://sandbox");
    }

    #[test]
    fn blank_settings_count_as_missing() {
        let creds = ProviderCredentials::new(json!({"secret_key": "  "}), false);
        assert!(creds.get("secret_key").is_none());
        assert!(matches!(
            creds.webhook_secret(PaymentTag::MoyaSar, "secret_key"),
            Err(ServiceError::WebhookRejected(_))
        ));
    }

    #[test]
    fn minor_units_round_half_cents() {
        assert_eq!(minor_units(dec!(10.00)).unwrap(), 1000);
        assert_eq!(minor_units(dec!(0.025)).unwrap(), 3);
        assert!(matches!(
            minor_units(Decimal::MAX),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn pointer_str_reads_numbers_and_strings() {
        let value = json!({"data": {"id": 123, "ref": " abc "}});
        assert_eq!(pointer_str(&value, "/data/id").as_deref(), Some("123"));
        assert_eq!(pointer_str(&value, "/data/ref").as_deref(), Some("abc"));
        assert_eq!(pointer_str(&value, "/data/missing"), None);
    }
}
